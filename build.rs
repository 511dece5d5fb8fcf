use std::env;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=web/dist");

    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let dist_dir = Path::new(&manifest_dir).join("web/dist");

    // The web UI is optional; without it the server only exposes the API.
    if !dist_dir.join("index.html").is_file() {
        return;
    }

    let canonical = dist_dir
        .canonicalize()
        .unwrap_or_else(|_| dist_dir.clone());

    println!(
        "cargo:rustc-env=ISSUEMAP_BUNDLED_WEB_DIST={}",
        canonical.display()
    );
}
