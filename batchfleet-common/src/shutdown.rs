// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Graceful shutdown signal shared by the Manager and Worker binaries.
//! Races `Ctrl+C` against `SIGTERM`, whichever arrives first.

use tracing::info;

/// Resolves on the first of `Ctrl+C` or `SIGTERM`. Callers race this
/// against their main run future with `tokio::select!` so a best-effort
/// log upload can run before exit instead of the process dying mid-write.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
