use clap::Parser;
use sessionward::cli::{
    Args, build_config, handle_hash_password, init_logging, load_secrets, load_users,
    validate_public_origin,
};
use sessionward::{create_app, serve};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    if args.hash_password {
        handle_hash_password();
        return;
    }

    let Some(secrets) = load_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(public_origin) = validate_public_origin(&args.public_origin) else {
        std::process::exit(1);
    };

    let Some(users) = load_users(&args.users_file) else {
        std::process::exit(1);
    };

    let config = build_config(&args, secrets, &public_origin, users);
    let app = create_app(&config).unwrap_or_else(|e| {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(
            address = %local_addr,
            access_ttl_minutes = args.access_ttl_minutes,
            inactivity_minutes = args.inactivity_minutes,
            secure_cookies = config.secure_cookies,
            "Listening"
        ),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    if let Err(e) = serve(app, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
