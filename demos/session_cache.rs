//! Session-cache walkthrough: puts a handful of sessions into a folder,
//! keeps one alive by touching it, and lets the rest lapse into the expiry
//! listener.
//!
//! Run with:
//!     cargo run --example session_cache

use std::thread;
use std::time::Duration;

use lapse::{ExpiryFolder, ExpiryStrategy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lapse=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Sessions idle out after 2 s, checked every 500 ms.
    let strategy = ExpiryStrategy::new(Duration::from_secs(2), Duration::from_millis(500))
        .expect("valid expiry configuration");

    let sessions: ExpiryFolder<String, String> = ExpiryFolder::builder("sessions")
        .on_expired(|entries| {
            for (token, user) in entries {
                println!("  session {token} for {user} lapsed");
            }
        })
        .build(&strategy);

    for (token, user) in [
        ("tok-1", "amara"),
        ("tok-2", "bo"),
        ("tok-3", "chidi"),
    ] {
        sessions
            .put(token.to_string(), user.to_string())
            .expect("folder lock available");
        println!("stored session {token} for {user}");
    }
    println!("folder holds {} sessions", sessions.size());

    // Keep tok-1 alive by touching it; tok-2 and tok-3 idle out.
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(600));
        if sessions
            .get(&"tok-1".to_string())
            .expect("folder lock available")
            .is_some()
        {
            println!("touched tok-1, still alive");
        }
    }

    println!(
        "after 3.6 s: {} session(s) left, stats: {:?}",
        sessions.size(),
        sessions.stats()
    );

    strategy.stop();
}
