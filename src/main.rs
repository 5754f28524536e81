use std::{thread, time::Instant};
use worker_pool::{PoolResult, ThreadPool};

fn print_task(n: usize) -> usize {
    println!(
        "task {n} is running on {}",
        thread::current().name().unwrap_or("<unnamed>")
    );
    n
}

fn main() -> PoolResult<()> {
    let now = Instant::now();
    let pool = ThreadPool::new(Some(4))?;

    let handles = (0..10)
        .map(|i| pool.submit_with(print_task, i))
        .collect::<PoolResult<Vec<_>>>()?;

    let sum: usize = handles
        .into_iter()
        .filter_map(|handle| handle.wait().ok())
        .sum();

    pool.shutdown();
    println!("sum: {sum}, elapsed: {:?}", now.elapsed());
    Ok(())
}
