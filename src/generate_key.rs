// generate_key.rs
// Utility to generate a new session signing key

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// 512 bits, the HS256 block size
const KEY_BYTES: usize = 64;

fn generate_key() -> String {
    let mut key = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    URL_SAFE_NO_PAD.encode(key)
}

fn main() {
    println!("Generating new HS256 session signing key...\n");

    let key = generate_key();

    println!("✅ Key generated successfully!\n");
    println!("Add this to your .env file:");
    println!("─────────────────────────────────────────────────");
    println!("JWT_SIGNING_KEY={}", key);
    println!("─────────────────────────────────────────────────");
    println!("\n⚠️  IMPORTANT:");
    println!("  • Keep this key secure and never commit it to version control");
    println!("  • Every service validating sessions needs the same key");
    println!("  • Rotating it signs every user out at their next request");
}
