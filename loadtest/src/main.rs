use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the webp-proxy cache.
///
/// Simulates the traffic shapes that matter for the disk cache:
/// - Hot keys requested over and over (cache hits, disk reads only)
/// - Bursts on a handful of fresh keys (concurrent misses that must share
///   one fetch and one transcode)
/// - Unique keys (full fetch + cwebp cost on every request)
/// - Health monitoring endpoint
///
/// The origin configured on the proxy must serve `/samples/<n>.jpg`.
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8098 --users 20 --hatch-rate 5 --run-time 60s
/// ```

const SAMPLES: u32 = 8;

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("CachePerformance")
                // Fixed parameters are hits after the first request per sample
                .register_transaction(transaction!(cached_image).set_weight(15)?)
                // Fresh keys every minute, hit by many users at once
                .register_transaction(transaction!(burst_image).set_weight(5)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("TransformThroughput")
                .register_transaction(transaction!(uncached_image).set_weight(1)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Steady-state hit latency on a small set of hot keys.
async fn cached_image(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let sample = rand::thread_rng().gen_range(0..SAMPLES);
        format!("/?url=/samples/{}.jpg&w=500&q=80", sample)
    };
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Concurrent first requests for the same key.
///
/// All users pick from the same few keys, and the keys rotate every minute,
/// so each rotation starts with a stampede of misses on each key.
async fn burst_image(user: &mut GooseUser) -> TransactionResult {
    let url = {
        let minute = chrono::Utc::now().timestamp() / 60;
        let sample = rand::thread_rng().gen_range(0..SAMPLES);
        format!("/?url=/samples/{}.jpg&w={}&q=70", sample, 100 + minute % 500)
    };
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Worst-case latency: every request is a new key.
async fn uncached_image(user: &mut GooseUser) -> TransactionResult {
    let url = {
        let mut rng = rand::thread_rng();
        format!(
            "/?url=/samples/{}.jpg&w={}&h={}&q={}",
            rng.gen_range(0..SAMPLES),
            rng.gen_range(100..2000),
            rng.gen_range(100..2000),
            rng.gen_range(50..95)
        )
    };
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Baseline for infrastructure latency separate from the pipeline.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
