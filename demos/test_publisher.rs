use anyhow::Result;
use std::time::Duration;

/// Simple test publisher for data that can be recorded
#[tokio::main]
async fn main() -> Result<()> {
    println!("Starting test data publisher...");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!("Zenoh session opened");
    println!("\nPublishing test data to test/topic1 and test/topic2");
    println!("Start the recorder in another terminal to capture this data\n");

    for i in 0..100 {
        session
            .put("test/topic1", format!("test_data_topic1_{}", i))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        session
            .put("test/topic2", format!("test_data_topic2_{}", i))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if i % 10 == 0 {
            println!("Published {} samples", i);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\n✓ Published 100 samples to each topic");
    println!("Toggle the recorder with: z_get -s recorder/start_recording, then recorder/stop_recording");

    Ok(())
}
