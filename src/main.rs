use tracing::{error, info};

use clinic_guard::{AuthGuard, Config};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("clinic-guard.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load clinic-guard.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = clinic_guard::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        clinic_guard::logging::init_console_only(&config.logging.level);
    }

    info!("Clinic Guard starting");

    let mut guard = match AuthGuard::from_config(&config) {
        Ok(guard) => guard,
        Err(e) => {
            error!("Failed to configure auth guard: {}", e);
            std::process::exit(1);
        }
    };

    if guard.check_session() {
        if let Some(session) = guard.current_principal() {
            info!(
                key = %session.key,
                role = %session.role,
                provider = %session.provider,
                "Resumed persisted session"
            );
        }
    } else {
        info!(state = ?guard.state(), "No active session, login required");
    }
}
