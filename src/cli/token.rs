use std::error::Error;

use crate::core::token_store::McpTokenStore;

pub fn set_token(store: &McpTokenStore, server: &str, token: &str) -> Result<(), Box<dyn Error>> {
    let server = server.to_ascii_lowercase();
    let token = token.trim();
    if token.is_empty() {
        return Err("Token must not be empty".into());
    }
    store.set_token(&server, token)?;
    println!("✅ Stored bearer token for {server}");
    Ok(())
}

pub fn remove_token(store: &McpTokenStore, server: &str) -> Result<(), Box<dyn Error>> {
    let server = server.to_ascii_lowercase();
    if store.remove_token(&server)? {
        println!("✅ Removed bearer token for {server}");
    } else {
        println!("No bearer token stored for {server}");
    }
    Ok(())
}
