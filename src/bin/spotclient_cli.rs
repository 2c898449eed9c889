use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use spotclient::config::StoredCredentials;
use spotclient::{ContentFeeder, Credentials, PlayableId, PlayerConfig, Session, SessionConfig};

#[derive(Parser)]
#[command(name = "spotclient-cli")]
#[command(about = "CLI for spotclient - a Spotify access-point protocol client", long_about = None)]
struct Cli {
    /// Spotify account username (can also be set via SPOTIFY_USERNAME env var)
    #[arg(long, env = "SPOTIFY_USERNAME")]
    username: Option<String>,

    /// Spotify account password (can also be set via SPOTIFY_PASSWORD env var)
    #[arg(long, env = "SPOTIFY_PASSWORD")]
    password: Option<String>,

    /// Path to a JSON file with a previously stored reusable credential
    #[arg(long, env = "SPOTCLIENT_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    /// Preferred audio quality
    #[arg(short, long, value_enum, default_value_t = Quality::High)]
    quality: Quality,

    /// Persist the reusable credential returned after a successful login
    #[arg(long)]
    store_credentials: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Quality {
    Normal,
    High,
    VeryHigh,
    Lossless,
}

impl From<Quality> for spotclient::Quality {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Normal => spotclient::Quality::NORMAL,
            Quality::High => spotclient::Quality::HIGH,
            Quality::VeryHigh => spotclient::Quality::VERY_HIGH,
            Quality::Lossless => spotclient::Quality::LOSSLESS,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the country code and a few user attributes
    Login,
    /// Fetch and print metadata for a track or episode
    Metadata {
        /// `spotify:track:...` or `spotify:episode:...` URI
        uri: String,
    },
    /// Open a stream for a track or episode and report how many bytes it holds
    Play {
        /// `spotify:track:...` or `spotify:episode:...` URI
        uri: String,
    },
}

fn credentials(cli: &Cli) -> spotclient::Result<Credentials> {
    if let Some(path) = &cli.credentials_file {
        if path.exists() {
            return Ok(Credentials::Stored(StoredCredentials::load(path)?));
        }
    }
    match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => Ok(Credentials::UserPass {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => Err(spotclient::Error::Unsupported(
            "no credentials: pass --username/--password or a --credentials-file that exists",
        )),
    }
}

fn connect(cli: &Cli) -> spotclient::Result<Session> {
    let session = Session::connect(SessionConfig::default(), credentials(cli)?)?;
    if cli.store_credentials {
        if let (Some(path), Some(stored)) = (&cli.credentials_file, session.stored_credentials()) {
            stored.save(path)?;
        }
    }
    Ok(session)
}

fn player_config(cli: &Cli) -> PlayerConfig {
    PlayerConfig {
        preferred_quality: cli.quality.into(),
        ..PlayerConfig::default()
    }
}

fn main() -> spotclient::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Login => {
            let session = connect(&cli)?;
            println!("logged in as device {}", session.device_id());
            if let Some(country) = session.country_code() {
                println!("country: {country}");
            }
        }
        Commands::Metadata { uri } => {
            let session = connect(&cli)?;
            let id = PlayableId::from_uri(uri)?;
            let api = spotclient::api::ApiClient::new();
            match api.metadata_for(&session, &id)? {
                spotclient::api::Metadata::Track(track) => {
                    println!("track: {}", track.name.unwrap_or_default());
                    println!("files: {}", track.file.len());
                }
                spotclient::api::Metadata::Episode(episode) => {
                    println!("episode: {}", episode.name.unwrap_or_default());
                    println!("files: {}", episode.file.len());
                }
            }
        }
        Commands::Play { uri } => {
            let session = connect(&cli)?;
            let id = PlayableId::from_uri(uri)?;
            let feeder = ContentFeeder::new(session, player_config(&cli));
            let loaded = feeder.load(&id)?;
            println!(
                "opened stream: {} bytes, format {:?}, quality {:?}",
                loaded.stream.size(),
                loaded.metrics.format,
                loaded.metrics.requested_quality
            );
            if let Some(norm) = loaded.normalization {
                println!(
                    "normalization: track_gain_db={:.2} track_peak={:.2}",
                    norm.track_gain_db, norm.track_peak
                );
            }
        }
    }

    Ok(())
}
