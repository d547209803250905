use message_loop::{Config, MessageLoop};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;
use tracing_subscriber::EnvFilter;


fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rt = Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;

    let message_loop = Arc::new(MessageLoop::with_config(Config::named("demo-loop"))?);

    rt.block_on(async {
        let now = Instant::now();

        let handles: Vec<_> = (0..100_000u64)
            .map(|i| message_loop.begin_invoke(move || i * 2))
            .collect::<Result<_, _>>()?;

        let mut sum = 0u64;
        for handle in handles {
            sum += handle.await?;
        }

        // Блокирующий invoke не должен занимать поток рантайма
        let ml = Arc::clone(&message_loop);
        let name = tokio::task::spawn_blocking(move || {
            ml.invoke(|| std::thread::current().name().map(str::to_owned))
        })
        .await??;

        println!("sum: {sum}, dispatcher: {name:?}, elapsed: {:?}", now.elapsed());
        println!("{:?}", message_loop.metrics());
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    message_loop.dispose();
    Ok(())
}
