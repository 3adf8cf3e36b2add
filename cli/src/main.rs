use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use soniclink_core::{Config, Decoder, Encoder, LogSink, RsaKeys, SliceSource, SonicLinkError};

#[derive(Parser)]
#[command(name = "soniclink", version, about = "Near-ultrasonic acoustic modem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct SignalArgs {
    /// Sample rate in Hz
    #[arg(long, default_value_t = 48_000)]
    sample_rate: usize,
    /// Lower band edge in Hz
    #[arg(long, default_value_t = 18_000.0)]
    band_low: f64,
    /// Upper band edge in Hz
    #[arg(long, default_value_t = 22_000.0)]
    band_high: f64,
    /// Skip the 17 kHz start tone (and don't gate reception on it)
    #[arg(long)]
    no_start_tone: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a payload into a WAV file
    Send {
        /// Input file ("-" for stdin)
        #[arg(short, long, conflicts_with = "text")]
        input: Option<PathBuf>,
        /// Literal text payload
        #[arg(short, long)]
        text: Option<String>,
        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,
        /// Huffman-compress the payload
        #[arg(long)]
        compress: bool,
        /// Encrypt for the recipient public key
        #[arg(long, requires = "pubkey")]
        encrypt: bool,
        /// Recipient public key (PEM)
        #[arg(long)]
        pubkey: Option<PathBuf>,
        #[command(flatten)]
        signal: SignalArgs,
    },
    /// Decode one frame from a WAV file
    Recv {
        /// Input WAV path
        #[arg(short, long)]
        input: PathBuf,
        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Private key (PEM) for encrypted frames
        #[arg(long)]
        privkey: Option<PathBuf>,
        /// Listening bound before the first preamble, ms
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
        #[command(flatten)]
        signal: SignalArgs,
    },
    /// Decode frames from a WAV file until it runs out
    Listen {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        privkey: Option<PathBuf>,
        #[command(flatten)]
        signal: SignalArgs,
    },
    /// Report whether the start tone is present
    Detect {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
        #[command(flatten)]
        signal: SignalArgs,
    },
    /// Generate an RSA-2048 key pair as PEM files
    Keygen {
        /// Directory for soniclink_private.pem / soniclink_public.pem
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(message) = run(Cli::parse()) {
        eprintln!("Error: {message}");
        exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Send {
            input,
            text,
            output,
            compress,
            encrypt,
            pubkey,
            signal,
        } => {
            let payload = match (input, text) {
                (_, Some(text)) => text.into_bytes(),
                (Some(path), None) if path.as_os_str() == "-" => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .map_err(|e| format!("reading stdin: {e}"))?;
                    buf
                }
                (Some(path), None) => {
                    fs::read(&path).map_err(|e| format!("reading {}: {e}", path.display()))?
                }
                (None, None) => return Err("either --input or --text is required".to_string()),
            };

            let cfg = Config {
                compress,
                encrypt,
                ..config_from(&signal)
            };
            let mut encoder = Encoder::new(cfg.clone())
                .map_err(|e| e.to_string())?
                .with_trace(Arc::new(LogSink));
            if encrypt {
                let path = pubkey.expect("clap enforces --pubkey with --encrypt");
                let pem = fs::read_to_string(&path)
                    .map_err(|e| format!("reading {}: {e}", path.display()))?;
                let keys = RsaKeys::from_public_pem(&pem).map_err(|e| e.to_string())?;
                encoder = encoder.with_keys(Box::new(keys));
            }

            let waveform = encoder.encode_frame(&payload).map_err(|e| e.to_string())?;
            write_wav(&output, &waveform, cfg.sample_rate)?;
            println!(
                "Encoded {} bytes into {} samples ({:.2}s) -> {}",
                payload.len(),
                waveform.len(),
                waveform.len() as f64 / cfg.sample_rate as f64,
                output.display()
            );
            Ok(())
        }

        Command::Recv {
            input,
            output,
            privkey,
            timeout_ms,
            signal,
        } => {
            let cfg = Config {
                idle_timeout_ms: timeout_ms,
                ..config_from(&signal)
            };
            let samples = read_wav(&input, cfg.sample_rate)?;
            let decoder = build_decoder(&cfg, privkey.as_deref())?;
            let mut source = SliceSource::new(&samples);
            let payload = decoder
                .decode_stream(&mut source)
                .map_err(|e| e.to_string())?;
            match output {
                Some(path) => {
                    fs::write(&path, &payload)
                        .map_err(|e| format!("writing {}: {e}", path.display()))?;
                    println!("Wrote {} bytes to {}", payload.len(), path.display());
                }
                None => {
                    std::io::stdout()
                        .write_all(&payload)
                        .map_err(|e| format!("writing stdout: {e}"))?;
                }
            }
            Ok(())
        }

        Command::Listen {
            input,
            privkey,
            signal,
        } => {
            let cfg = config_from(&signal);
            let samples = read_wav(&input, cfg.sample_rate)?;
            let decoder = build_decoder(&cfg, privkey.as_deref())?;
            let mut source = SliceSource::new(&samples);
            let mut frames = 0usize;
            loop {
                match decoder.decode_stream(&mut source) {
                    Ok(payload) => {
                        frames += 1;
                        match String::from_utf8(payload.clone()) {
                            Ok(text) => println!("[{frames}] {} bytes: {text}", payload.len()),
                            Err(_) => println!("[{frames}] {} bytes (binary)", payload.len()),
                        }
                    }
                    Err(SonicLinkError::NoPreamble) | Err(SonicLinkError::IoExhausted) => break,
                    Err(e) => eprintln!("frame error: {e}"),
                }
            }
            println!("Decoded {frames} frame(s)");
            Ok(())
        }

        Command::Detect {
            input,
            timeout_ms,
            signal,
        } => {
            let cfg = config_from(&signal);
            let samples = read_wav(&input, cfg.sample_rate)?;
            let decoder = Decoder::new(cfg).map_err(|e| e.to_string())?;
            let mut source = SliceSource::new(&samples);
            let armed = decoder
                .detect(&mut source, timeout_ms)
                .map_err(|e| e.to_string())?;
            println!("{}", if armed { "start tone detected" } else { "no start tone" });
            if !armed {
                exit(2);
            }
            Ok(())
        }

        Command::Keygen { dir } => {
            fs::create_dir_all(&dir).map_err(|e| format!("creating {}: {e}", dir.display()))?;
            let keys = RsaKeys::generate().map_err(|e| e.to_string())?;
            let private_path = dir.join("soniclink_private.pem");
            let public_path = dir.join("soniclink_public.pem");
            fs::write(&private_path, keys.private_pem().map_err(|e| e.to_string())?)
                .map_err(|e| format!("writing {}: {e}", private_path.display()))?;
            fs::write(&public_path, keys.public_pem().map_err(|e| e.to_string())?)
                .map_err(|e| format!("writing {}: {e}", public_path.display()))?;
            println!(
                "Wrote {} and {}",
                private_path.display(),
                public_path.display()
            );
            Ok(())
        }
    }
}

fn config_from(signal: &SignalArgs) -> Config {
    Config {
        sample_rate: signal.sample_rate,
        band_low: signal.band_low,
        band_high: signal.band_high,
        start_tone: !signal.no_start_tone,
        ..Config::default()
    }
}

fn build_decoder(cfg: &Config, privkey: Option<&Path>) -> Result<Decoder, String> {
    let mut decoder = Decoder::new(cfg.clone())
        .map_err(|e| e.to_string())?
        .with_trace(Arc::new(LogSink));
    if let Some(path) = privkey {
        let pem =
            fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let keys = RsaKeys::from_private_pem(&pem).map_err(|e| e.to_string())?;
        decoder = decoder.with_keys(Box::new(keys));
    }
    Ok(decoder)
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: usize) -> Result<(), String> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| format!("creating WAV: {e}"))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| format!("writing WAV: {e}"))?;
    }
    writer.finalize().map_err(|e| format!("finalizing WAV: {e}"))
}

/// Read a WAV file as mono f32, averaging channels and converting integer
/// PCM as needed.
fn read_wav(path: &Path, expected_rate: usize) -> Result<Vec<f32>, String> {
    let reader =
        hound::WavReader::open(path).map_err(|e| format!("opening {}: {e}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate as usize != expected_rate {
        return Err(format!(
            "{} is {} Hz, expected {expected_rate} Hz",
            path.display(),
            spec.sample_rate
        ));
    }
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| format!("reading WAV: {e}"))?,
        SampleFormat::Int => {
            let shift = 1i64 << (spec.bits_per_sample - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / shift as f32))
                .collect::<Result<_, _>>()
                .map_err(|e| format!("reading WAV: {e}"))?
        }
    };

    if channels == 1 {
        return Ok(interleaved);
    }
    Ok(interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}
