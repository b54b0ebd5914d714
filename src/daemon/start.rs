use crate::config::config::Config;
use crate::console::patterns::PATTERN_VERSION;

pub fn print_banner(config: &Config) {
    let ascii_art = format!(
        r#"
   ___                  _       ___     _    _
  / __|___ _ _  ___ ___| |___  | _ )_ _(_)__| |__ _ ___
 | (__/ _ \ ' \(_-</ _ \ / -_) | _ \ '_| / _` / _` / -_)
  \___\___/_||_/__/\___/_\___| |___/_| |_\__,_\__, \___|
                                              |___/
Console Bridge v{}  (patterns {})
Panel: {}  Server: {}
"#,
        env!("CARGO_PKG_VERSION"),
        PATTERN_VERSION,
        config.panel_base(),
        config.panel.server_id
    );

    println!("{}", ascii_art);
}

/// Resolves on Ctrl+C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Ctrl+C received"),
        _ = terminate => tracing::warn!("SIGTERM received"),
    }
}
