use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::sync::Once;
use tr31::{EncodeOptions, KeyBlockCodec, MacAlgorithm, SplitStrategy, KEK_ENV_VAR};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("TR31_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        // Logs go to stderr so stdout carries only the key block or JSON.
        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "tr31ctl")]
#[command(about = "TR-31 key block utility", long_about = None)]
struct Cli {
    /// Key encryption key as hex (falls back to TR31_KEK)
    #[arg(long, global = true)]
    kek: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MacArg {
    /// CBC-MAC, byte-compatible with existing blocks
    Legacy,
    /// NIST SP 800-38B CMAC
    Cmac,
}

impl From<MacArg> for MacAlgorithm {
    fn from(arg: MacArg) -> Self {
        match arg {
            MacArg::Legacy => MacAlgorithm::LegacyCbcMac,
            MacArg::Cmac => MacAlgorithm::Cmac,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Wrap a key into a key block
    Encode(EncodeArgs),
    /// Unwrap a key block and print it as JSON
    Decode {
        /// Key block string
        block: String,
        /// Accept the first block-aligned split without checking the tag
        #[arg(long)]
        structural: bool,
        #[arg(long, value_enum, default_value = "legacy")]
        mac: MacArg,
        /// Verify and unwrap as a standard X9.143 version-D block
        #[arg(long)]
        standard: bool,
    },
    /// Strip ISO 9797-1 method 2 padding from hex data
    Unpad {
        /// Hex data
        data: String,
    },
}

#[derive(Debug, Args)]
struct EncodeArgs {
    /// Key to wrap, hex
    #[arg(long)]
    key: String,
    /// 'A' (AES) or 'T' (TDES)
    #[arg(long)]
    algorithm: Option<char>,
    /// 'D' (CBC) or 'B' (ECB)
    #[arg(long)]
    version_id: Option<char>,
    #[arg(long)]
    key_usage: Option<String>,
    #[arg(long)]
    mode_of_use: Option<char>,
    #[arg(long)]
    key_version: Option<String>,
    /// 'E' (exportable) or 'N' (non-exportable)
    #[arg(long)]
    exportability: Option<char>,
    /// Tag length in bytes: 4, 8 or 16
    #[arg(long)]
    tag_length: Option<usize>,
    #[arg(long, value_enum, default_value = "legacy")]
    mac: MacArg,
    /// Produce a standard X9.143 version-D block
    #[arg(long)]
    standard: bool,
    /// YAML file with encode options; flags take precedence
    #[arg(long)]
    options_file: Option<String>,
}

impl EncodeArgs {
    fn options(&self) -> Result<EncodeOptions> {
        let mut options = match &self.options_file {
            Some(path) => load_options_file(path)?,
            None => EncodeOptions::default(),
        };

        if let Some(algorithm) = self.algorithm {
            options.algorithm = algorithm;
        }
        if let Some(version_id) = self.version_id {
            options.version_id = version_id;
        }
        if let Some(key_usage) = &self.key_usage {
            options.key_usage = key_usage.clone();
        }
        if let Some(mode_of_use) = self.mode_of_use {
            options.mode_of_use = mode_of_use;
        }
        if let Some(key_version) = &self.key_version {
            options.key_version = key_version.clone();
        }
        if let Some(exportability) = self.exportability {
            options.exportability = exportability;
        }
        if let Some(tag_length) = self.tag_length {
            options.tag_length = tag_length;
        }

        Ok(options)
    }
}

fn load_options_file(path: &str) -> Result<EncodeOptions> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let options = serde_yaml::from_str(&text).map_err(|err| anyhow!(err))?;
    debug!(path, "loaded encode options");
    Ok(options)
}

fn build_codec(kek: Option<&str>) -> Result<KeyBlockCodec> {
    let codec = match kek {
        Some(kek_hex) => KeyBlockCodec::new(kek_hex)?,
        None => KeyBlockCodec::from_env()
            .with_context(|| format!("no usable KEK: pass --kek or set {KEK_ENV_VAR}"))?,
    };
    Ok(codec)
}

fn run(cli: Cli) -> Result<String> {
    let kek = cli.kek.as_deref();

    match cli.command {
        Commands::Encode(args) => {
            let options = args.options()?;
            let codec = build_codec(kek)?.with_mac_algorithm(args.mac.into());
            let key = args.key.trim();

            let block = if args.standard {
                codec.encode_standard(key, &options)?
            } else {
                codec.encode(key, &options)?
            };
            Ok(block)
        }
        Commands::Decode {
            block,
            structural,
            mac,
            standard,
        } => {
            let split = if structural {
                SplitStrategy::Structural
            } else {
                SplitStrategy::Authenticated
            };
            let codec = build_codec(kek)?
                .with_mac_algorithm(mac.into())
                .with_split_strategy(split);
            let block = block.trim();

            let json = if standard {
                serde_json::to_string_pretty(&codec.decode_standard(block)?)?
            } else {
                serde_json::to_string_pretty(&codec.decode(block)?)?
            };
            Ok(json)
        }
        Commands::Unpad { data } => {
            let bytes = hex::decode(data.trim()).context("unpad input is not valid hex")?;
            Ok(hex::encode_upper(tr31::unpad(&bytes)))
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let output = run(cli)?;
    println!("{}", output);

    Ok(())
}
