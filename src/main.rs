use simulation::{simulate_collaboration, simulate_shuffled_delivery};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    let converged = rt.block_on(async_main());
    if !converged {
        std::process::exit(1);
    }
    Ok(())
}

async fn async_main() -> bool {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONVERGENCE SIMULATIONS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!("  started at {}", chrono::Utc::now().to_rfc3339());

    let runs = vec![
        simulate_shuffled_delivery(4, 100, 8).await,
        simulate_shuffled_delivery(16, 250, 8).await,
        simulate_collaboration(4, 200, 3).await,
        simulate_collaboration(10, 500, 3).await,
    ];

    let mut all_converged = true;
    for stats in &runs {
        stats.print();
        all_converged &= stats.converged();
    }

    if all_converged {
        println!("\n✓ All replicas converged");
    } else {
        println!("\n✗ Some replicas diverged");
    }
    all_converged
}
