use anyhow::{Context, Result};
use std::path::Path;
use telemon_common::crypto::PayloadDecryptor;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  telemon-keygen <private.key> <public.key>   Write a new hex key pair");
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting {}", path.display()))?;
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (Some(private_path), Some(public_path)) = (args.get(1), args.get(2)) else {
        print_usage();
        anyhow::bail!("telemon-keygen requires <private.key> and <public.key> arguments");
    };

    let keys = PayloadDecryptor::generate();
    write_private(Path::new(private_path), &keys.private_key_hex())?;
    std::fs::write(public_path, keys.public_key_hex())
        .with_context(|| format!("writing {public_path}"))?;

    println!("private key (server crypto_key): {private_path}");
    println!("public key (agent crypto_key):   {public_path}");
    Ok(())
}
