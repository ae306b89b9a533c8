use seqpool::{Console, Pipeline};
use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Box<dyn Error>>;

fn main() -> Result<()> {
    let start = Instant::now();

    // Five workers square the numbers 1 through 100. Results are printed to
    // stdout in input order no matter which worker finishes first.
    let pipeline = Pipeline::builder().workers(5).build()?;
    let report = pipeline.try_run(1..=100u64, square, Console::stdout())?;

    for failure in &report.failures {
        eprintln!("{}", failure);
    }
    eprintln!();
    eprintln!("workers: {:?}", report.per_worker);
    eprintln!("execution time: {:?}", start.elapsed());
    Ok(())
}

fn square(n: u64) -> std::result::Result<u64, String> {
    // Do some expensive work...
    thread::sleep(Duration::from_millis(10 * (n % 7)));

    // ... which may fail or succeed.
    n.checked_mul(n)
        .ok_or_else(|| format!("{} squared does not fit in 64 bits", n))
}
