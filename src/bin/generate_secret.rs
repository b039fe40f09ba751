use clap::Parser;
use log::*;
use service::logging::{self, Output};
use session_auth::keys::generate_secret;

/// Print a fresh signing secret usable for both ES256 and HS256.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print only the secret instead of an `AUTH_SECRET=` line.
    #[arg(long)]
    raw: bool,
}

fn main() {
    let args = Args::parse();
    // Stdout carries the secret.
    let _ = logging::init(LevelFilter::Warn, Output::Stderr);

    match generate_secret() {
        Ok(secret) => println!("{}", render(&secret, args.raw)),
        Err(e) => {
            error!("Failed to generate secret: {e}");
            std::process::exit(1);
        }
    }
}

fn render(secret: &str, raw: bool) -> String {
    if raw {
        secret.to_string()
    } else {
        format!("AUTH_SECRET={secret}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_env_line_by_default() {
        assert_eq!(render("abc", false), "AUTH_SECRET=abc");
        assert_eq!(render("abc", true), "abc");
    }

    #[test]
    fn raw_flag_is_optional() {
        assert!(!Args::try_parse_from(["generate_secret"]).unwrap().raw);
        assert!(Args::try_parse_from(["generate_secret", "--raw"]).unwrap().raw);
    }
}
