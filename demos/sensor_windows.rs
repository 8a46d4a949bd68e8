//! Example: Windowing Sensor Readings with Rivulet
//!
//! Two simulated sensors tick on a scheduler. Their readings are combined,
//! batched into fixed time windows and summarised. The first part runs on
//! virtual time, so the output is the same on every run; the second part
//! drives the same pipeline with tokio and reads it back as a `Stream`.

use futures::StreamExt;
use rivulet::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

// =============================================================================
// Domain
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Reading {
    sensor: &'static str,
    celsius: f64,
}

/// A sensor producing a slowly drifting temperature every `period`.
fn sensor(name: &'static str, base: f64, period: Duration, scheduler: &Scheduler) -> Observable<Reading> {
    Observable::interval(period, scheduler).map(move |tick| Reading {
        sensor: name,
        celsius: base + (tick % 5) as f64 * 0.5,
    })
}

#[derive(Debug)]
struct Summary {
    samples: usize,
    min: f64,
    max: f64,
    mean: f64,
}

fn summarise(batch: &[f64]) -> Option<Summary> {
    if batch.is_empty() {
        return None;
    }
    let min = batch.iter().copied().fold(f64::INFINITY, f64::min);
    let max = batch.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = batch.iter().sum::<f64>() / batch.len() as f64;
    Some(Summary {
        samples: batch.len(),
        min,
        max,
        mean,
    })
}

// =============================================================================
// Virtual Time
// =============================================================================

fn run_virtual() -> RivuletResult<()> {
    println!("--- virtual time ---");
    let vts = VirtualTimeScheduler::new();
    let scheduler = vts.scheduler();

    let indoor = sensor("indoor", 21.0, Duration::from_millis(30), &scheduler);
    let outdoor = sensor("outdoor", 12.0, Duration::from_millis(45), &scheduler);

    // Spread between the two sensors, batched per 100ms or every 4 samples.
    let spread = indoor
        .combine_latest_pair(&outdoor)
        .map(|(a, b)| a.celsius - b.celsius);

    let config = WindowConfig::builder(Duration::from_millis(100))
        .max_size(4)
        .build()?;

    let clock = scheduler.clone();
    let subscription = spread.buffer_time(config, &scheduler).subscribe_next(move |batch| {
        match summarise(&batch) {
            Some(s) => println!(
                "[{:>4}ms] {} samples, spread {:.1}..{:.1} (mean {:.2})",
                clock.now().as_millis(),
                s.samples,
                s.min,
                s.max,
                s.mean
            ),
            None => println!("[{:>4}ms] no samples", clock.now().as_millis()),
        }
    });

    vts.advance_to(Duration::from_millis(450));
    subscription.unsubscribe()?;
    println!("pending actions after unsubscribe: {}", vts.pending());

    // Windows of three readings from the indoor sensor alone.
    let windows = Rc::new(RefCell::new(Vec::new()));
    let w = Rc::clone(&windows);
    let indoor = sensor("indoor", 21.0, Duration::from_millis(30), &scheduler);
    let subscription = indoor.window_count(3).subscribe_next(move |window| {
        let index = {
            let mut windows = w.borrow_mut();
            windows.push(Vec::new());
            windows.len() - 1
        };
        let w = Rc::clone(&w);
        window.subscribe_next(move |reading: Reading| {
            w.borrow_mut()[index].push(reading.celsius);
        });
    });

    vts.advance_by(Duration::from_millis(270));
    subscription.unsubscribe()?;
    for (i, window) in windows.borrow().iter().enumerate() {
        println!("window {}: {:?}", i, window);
    }

    Ok(())
}

// =============================================================================
// Tokio
// =============================================================================

async fn run_async() -> RivuletResult<()> {
    println!("--- tokio ---");
    let scheduler = Scheduler::async_local();

    let readings = sensor("indoor", 21.0, Duration::from_millis(5), &scheduler)
        .throttle(Duration::from_millis(12), &scheduler)
        .map(|reading| (reading.sensor, reading.celsius));

    let (subscription, stream) = StreamBuilder::new().buffer_size(16).build(&readings);
    let received: Vec<_> = stream.take(4).collect().await;
    subscription.unsubscribe()?;

    for item in received {
        match item {
            Ok((sensor, celsius)) => println!("throttled {} reading: {:.1}", sensor, celsius),
            Err(err) => println!("stream error: {}", err),
        }
    }
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> RivuletResult<()> {
    run_virtual()?;

    let local = tokio::task::LocalSet::new();
    local.run_until(run_async()).await
}
