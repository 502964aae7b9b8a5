use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gravgate", about = "OpenAI/Anthropic-compatible gateway over a pooled OAuth2 backend")]
pub struct Cli {
    /// Bind address; overrides config.json.
    #[arg(long, default_value = "")]
    pub host: String,

    /// Bind port; overrides config.json.
    #[arg(long)]
    pub port: Option<u16>,

    /// State directory; falls back to GRAVGATE_DATA_DIR, then ./data.
    #[arg(long, default_value = "")]
    pub data_dir: String,
}
