use anyhow::Result;

pub fn cmd_version() -> Result<()> {
    println!("hintbridge {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE"));
    println!("Git Commit: {}", env!("GIT_HASH"));
    println!("Git Branch: {}", env!("GIT_BRANCH"));
    Ok(())
}
