//! Fetch a PHP script through a local PHP-FPM pool.
//!
//! Run with a pool listening on the default socket:
//! `cargo run --example get -- /run/php/php-fpm.sock /srv/index.php`

use std::time::Duration;

use fcgi_client::{Address, Client, Params, RequestScope};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let socket = args
        .next()
        .unwrap_or_else(|| "/run/php/php-fpm.sock".into());
    let script = args.next().unwrap_or_else(|| "/srv/index.php".into());

    let client = Client::connect(&Address::unix(&socket)).await?;

    let mut params = Params::new();
    params.insert("SCRIPT_FILENAME".into(), script.clone());
    params.insert("SCRIPT_NAME".into(), script);
    params.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
    params.insert("REMOTE_ADDR".into(), "127.0.0.1".into());

    let scope = RequestScope::with_timeout(Duration::from_secs(2));
    let response = client.get(&scope, params).await?;

    println!("status: {}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!("\n{}", String::from_utf8_lossy(&response.into_bytes()?));

    client.close().await?;
    Ok(())
}
