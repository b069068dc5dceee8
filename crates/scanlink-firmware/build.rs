//! Bakes backend defaults from the environment (or a `.env` file) into the
//! firmware image. Unset keys fall back to the values in `scanlink-core`.

const BAKED_KEYS: [&str; 3] = [
    "SCANLINK_DEFAULT_SERVER_URL",
    "SCANLINK_DEFAULT_FIREBASE_URL",
    "SCANLINK_DEFAULT_API_KEY",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    // A missing .env is fine; plain environment variables still apply.
    let _ = dotenvy::dotenv();

    for key in BAKED_KEYS {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }
}
