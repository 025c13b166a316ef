use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

fn main() {
    // Re-run build script when this file changes
    println!("cargo:rerun-if-changed=build.rs");

    // Compile-time defaults for the page title and model: LLMSERV_APP_TITLE / LLMSERV_DEFAULT_MODEL.
    println!("cargo:rerun-if-env-changed=LLMSERV_APP_TITLE");
    println!("cargo:rerun-if-env-changed=LLMSERV_DEFAULT_MODEL");
    let title = std::env::var("LLMSERV_APP_TITLE")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "llmserv".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_APP_TITLE={title}");
    let model = std::env::var("LLMSERV_DEFAULT_MODEL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "gpt-4o-mini".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_DEFAULT_MODEL={model}");

    // Build date (UTC RFC 3339). Fallback to "unknown" if formatting fails.
    let build_date = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_DATE={build_date}");

    // Target triple and profile
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_TARGET={target}");

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_PROFILE={profile}");

    // rustc version (best-effort)
    let rustc_ver = rustc_version::version_meta()
        .map(|m| m.short_version_string)
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=LLMSERV_BUILD_RUSTC={rustc_ver}");
}
