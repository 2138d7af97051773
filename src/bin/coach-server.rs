use coachd::config::ServerConfig;

fn main() {
    coachd::logging::init_tracing();
    let result = ServerConfig::from_env().and_then(|config| coachd::server::run(&config));
    if let Err(e) = result {
        tracing::error!(error = %format!("{:#}", e), "server stopped");
        std::process::exit(1);
    }
}
