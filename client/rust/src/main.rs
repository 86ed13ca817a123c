/// Tempchat Client - Main entry point
///
/// A command-line client for ephemeral password-protected chat rooms
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use tempchat_client::api::RoomApi;
use tempchat_client::cli;
use tempchat_client::ledger::MessageLedger;
use tempchat_client::models::{AutoDeletePolicy, CachedRoom, Command};
use tempchat_client::session::{RoomSession, SessionEnd, SessionEvent, SessionInput};
use tempchat_client::storage::LocalStore;
use tempchat_client::ClientError;
use tokio::io::BufReader;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "tempchat")]
#[command(about = "Tempchat Client - Ephemeral password-protected group chat")]
struct Args {
    /// Server URL
    #[arg(long, env = "TEMPCHAT_SERVER", default_value = "http://localhost:4000")]
    server: String,

    /// Directory for local databases (default: ~/.tempchat)
    #[arg(long, env = "TEMPCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a room and enter it as owner
    Create {
        /// Message lifetime: 1m, 30m, 1h or 24h
        #[arg(long, default_value = "1h")]
        auto_delete: AutoDeletePolicy,
        /// Six-digit password (generated when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Display name (random when omitted)
        #[arg(long)]
        name: Option<String>,
    },
    /// Join a room by code and password, or by a QR join link
    Join {
        room_code: Option<String>,
        password: Option<String>,
        /// Join link as encoded in a room QR code
        #[arg(long, conflicts_with_all = ["room_code", "password"])]
        url: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-enter a cached room
    Open {
        room_code: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List cached rooms
    Rooms,
    /// Drop a cached room and its local messages
    Forget { room_code: String },
    /// Show room details
    Info { room_code: String },
    /// Show the room password (owner only)
    Password { room_code: String },
    /// Show the room join link, optionally saving the QR image
    Qr {
        room_code: String,
        /// Write the QR code PNG to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Delete a room (owner only)
    Delete { room_code: String },
}

struct Client {
    api: RoomApi,
    server: String,
    store: LocalStore,
    ledger: MessageLedger,
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    use directories::BaseDirs;
    let base_dirs = BaseDirs::new().context("Failed to get home directory")?;
    Ok(base_dirs.home_dir().join(".tempchat"))
}

fn normalize_code(room_code: &str) -> String {
    room_code.trim().to_uppercase()
}

impl Client {
    fn open(server: &str, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Cannot create {}", data_dir.display()))?;

        Ok(Self {
            api: RoomApi::new(server)?,
            server: server.to_string(),
            store: LocalStore::new(data_dir.join("client.db"))?,
            ledger: MessageLedger::new(data_dir.join("ledger.db"))?,
        })
    }

    fn cached(&self, room_code: &str) -> anyhow::Result<CachedRoom> {
        let room_code = normalize_code(room_code);
        self.store
            .room(&room_code)?
            .with_context(|| format!("Room {} is not cached; join it first", room_code))
    }

    /// Report a server-side error; a vanished room is dropped from the cache
    fn handle_api_error(&self, room_code: &str, err: ClientError) -> anyhow::Result<()> {
        if err.is_not_found() {
            println!("Room {} no longer exists; forgetting it.", room_code);
            self.store.forget_room(room_code)?;
            self.ledger.clear_room(room_code)?;
            return Ok(());
        }
        Err(err.into())
    }

    async fn create(
        &self,
        auto_delete: AutoDeletePolicy,
        password: Option<&str>,
        name: Option<&str>,
    ) -> anyhow::Result<()> {
        let device_id = self.store.device_id()?;
        let created = self.api.create_room(&device_id, auto_delete, password).await?;

        println!("Room created: {}", created.room_code);
        println!("Password:     {}", created.password);
        println!("Messages expire after {}", created.auto_delete.as_str());

        let room = CachedRoom {
            room_code: created.room_code,
            token: created.token,
            auto_delete: created.auto_delete,
            is_owner: true,
            joined_at: Utc::now().timestamp_millis(),
        };
        self.store.save_room(&room)?;
        self.chat(room, name).await
    }

    async fn join(&self, room_code: &str, password: &str, name: Option<&str>) -> anyhow::Result<()> {
        let device_id = self.store.device_id()?;
        let joined = self
            .api
            .join_room(&normalize_code(room_code), password.trim(), &device_id)
            .await?;

        if joined.is_owner {
            println!("Joined {} as owner", joined.room_code);
        } else {
            println!("Joined {}", joined.room_code);
        }

        let room = CachedRoom {
            room_code: joined.room_code,
            token: joined.token,
            auto_delete: joined.auto_delete,
            is_owner: joined.is_owner,
            joined_at: Utc::now().timestamp_millis(),
        };
        self.store.save_room(&room)?;
        self.chat(room, name).await
    }

    async fn reopen(&self, room_code: &str, name: Option<&str>) -> anyhow::Result<()> {
        let room = self.cached(room_code)?;
        match self.api.room_info(&room.room_code, Some(&room.token)).await {
            Ok(info) => {
                let mut room = room;
                room.is_owner = info.is_owner;
                self.store.save_room(&room)?;
                self.chat(room, name).await
            }
            Err(err) => self.handle_api_error(&room.room_code, err),
        }
    }

    fn list_rooms(&self) -> anyhow::Result<()> {
        let rooms = self.store.rooms()?;
        if rooms.is_empty() {
            println!("No cached rooms");
            return Ok(());
        }
        for room in rooms {
            println!(
                "{}  {:>3}  {}",
                room.room_code,
                room.auto_delete.as_str(),
                if room.is_owner { "owner" } else { "member" }
            );
        }
        Ok(())
    }

    fn forget(&self, room_code: &str) -> anyhow::Result<()> {
        let room_code = normalize_code(room_code);
        let removed = self.ledger.clear_room(&room_code)?;
        if self.store.forget_room(&room_code)? {
            println!("Forgot {} ({} local messages dropped)", room_code, removed);
        } else {
            println!("Room {} was not cached", room_code);
        }
        Ok(())
    }

    async fn info(&self, room: &CachedRoom) -> anyhow::Result<()> {
        match self.api.room_info(&room.room_code, Some(&room.token)).await {
            Ok(info) => {
                println!("Room:        {}", info.room_code);
                println!("Auto-delete: {}", info.auto_delete.as_str());
                println!("Members:     {}", info.member_count);
                println!("Owner:       {}", if info.is_owner { "you" } else { "someone else" });
                Ok(())
            }
            Err(err) => self.handle_api_error(&room.room_code, err),
        }
    }

    async fn password(&self, room: &CachedRoom) -> anyhow::Result<()> {
        match self.api.password(&room.room_code, &room.token).await {
            Ok(password) => {
                println!("Password for {}: {}", room.room_code, password);
                Ok(())
            }
            Err(err) => self.handle_api_error(&room.room_code, err),
        }
    }

    async fn qr(&self, room: &CachedRoom, save: Option<&Path>) -> anyhow::Result<()> {
        let qr = match self.api.qr(&room.room_code).await {
            Ok(qr) => qr,
            Err(err) => return self.handle_api_error(&room.room_code, err),
        };

        println!("Join link: {}", qr.url);
        println!("Valid for {}s", qr.expires_in / 1000);

        if let Some(path) = save {
            let encoded = qr
                .qr_code
                .strip_prefix("data:image/png;base64,")
                .context("Unexpected QR image format")?;
            let png = STANDARD.decode(encoded).context("Corrupt QR image")?;
            std::fs::write(path, png)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            println!("QR code saved to {}", path.display());
        }
        Ok(())
    }

    async fn delete(&self, room: &CachedRoom) -> anyhow::Result<()> {
        match self.api.delete_room(&room.room_code, &room.token).await {
            Ok(()) => {
                self.store.forget_room(&room.room_code)?;
                self.ledger.clear_room(&room.room_code)?;
                println!("Room {} deleted", room.room_code);
                Ok(())
            }
            Err(err) => self.handle_api_error(&room.room_code, err),
        }
    }

    /// Interactive room prompt
    async fn chat(&self, room: CachedRoom, name: Option<&str>) -> anyhow::Result<()> {
        let room_code = room.room_code.clone();
        let mut session = RoomSession::open(
            &self.server,
            room.clone(),
            name.unwrap_or_default(),
            &self.ledger,
            &self.store,
        )
        .await?;

        let now = Utc::now();
        for entry in session.visible() {
            println!("{}", cli::format_message(&room_code, entry, now));
        }
        println!("Type a message, /attach <path>, /save <id> <path>, /info, /password, /qr, /delete or /leave");

        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        // Print session events as they arrive
        let printer_room = room_code.clone();
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    SessionEvent::UserJoined {
                        display_name,
                        member_count,
                    } => println!(
                        "{}",
                        cli::format_control(
                            &printer_room,
                            &format!("{} joined ({} online)", display_name, member_count)
                        )
                    ),
                    SessionEvent::UserLeft {
                        display_name,
                        member_count,
                    } => println!(
                        "{}",
                        cli::format_control(
                            &printer_room,
                            &format!("{} left ({} online)", display_name, member_count)
                        )
                    ),
                    SessionEvent::Message(entry) => {
                        println!("{}", cli::format_message(&printer_room, &entry, Utc::now()))
                    }
                    SessionEvent::Expired { message_id } => log::debug!("Message {} expired", message_id),
                    SessionEvent::ServerError(reason) => {
                        println!("{}", cli::format_control(&printer_room, &format!("error: {}", reason)))
                    }
                    SessionEvent::RoomDeleted => println!(
                        "{}",
                        cli::format_control(&printer_room, "room was deleted by its owner")
                    ),
                }
            }
        });

        // Read the prompt on its own task so the session loop never blocks on stdin
        let prompt_api = self.api.clone();
        let prompt_room = room.clone();
        let (save_tx, mut save_rx) = mpsc::unbounded_channel::<(String, PathBuf)>();
        let prompt = tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin());
            loop {
                let line = match cli::read_line_async(&mut reader).await {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => {
                        let _ = input_tx.send(SessionInput::Leave);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let command = match cli::parse_command(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };

                match command {
                    Command::Message(text) => {
                        let _ = input_tx.send(SessionInput::Send {
                            body: Some(text),
                            file_info: None,
                        });
                    }
                    Command::Attach(path) => match cli::read_attachment(Path::new(&path)) {
                        Ok(file_info) => {
                            let _ = input_tx.send(SessionInput::Send {
                                body: None,
                                file_info: Some(file_info),
                            });
                        }
                        Err(e) => println!("Cannot attach {}: {}", path, e),
                    },
                    Command::Save { message_id, path } => {
                        let _ = save_tx.send((message_id, PathBuf::from(path)));
                    }
                    Command::Info => match prompt_api.room_info(&prompt_room.room_code, Some(&prompt_room.token)).await {
                        Ok(info) => println!(
                            "{} members, messages expire after {}{}",
                            info.member_count,
                            info.auto_delete.as_str(),
                            if info.is_owner { ", you own this room" } else { "" }
                        ),
                        Err(e) => println!("{}", e),
                    },
                    Command::Password => match prompt_api.password(&prompt_room.room_code, &prompt_room.token).await {
                        Ok(password) => println!("Password: {}", password),
                        Err(e) => println!("{}", e),
                    },
                    Command::Qr => match prompt_api.qr(&prompt_room.room_code).await {
                        Ok(qr) => println!("Join link (valid {}s): {}", qr.expires_in / 1000, qr.url),
                        Err(e) => println!("{}", e),
                    },
                    Command::Delete => {
                        // The server's room-deleted broadcast ends the session
                        if let Err(e) = prompt_api.delete_room(&prompt_room.room_code, &prompt_room.token).await {
                            println!("{}", e);
                        }
                    }
                    Command::Leave => {
                        let _ = input_tx.send(SessionInput::Leave);
                        break;
                    }
                }
            }
        });

        // Attachment saves read the ledger, which lives on this task
        let end = loop {
            tokio::select! {
                end = session.run(&mut input_rx, &event_tx) => break end?,
                Some((message_id, path)) = save_rx.recv() => {
                    match self.ledger.attachment(&room_code, &message_id)? {
                        Some(data) => match cli::write_attachment(&data, &path) {
                            Ok(n) => println!("Saved {} bytes to {}", n, path.display()),
                            Err(e) => println!("Cannot save attachment: {}", e),
                        },
                        None => println!("No attachment stored for {}", message_id),
                    }
                }
            }
        };

        prompt.abort();
        drop(event_tx);
        let _ = printer.await;

        match end {
            SessionEnd::Left => info!("Left room {}", room_code),
            SessionEnd::RoomDeleted => println!("Room {} is gone", room_code),
            SessionEnd::Rejected(reason) => {
                println!("Server refused room {}: {}", room_code, reason);
                if reason == "room-not-found" {
                    self.store.forget_room(&room_code)?;
                    self.ledger.clear_room(&room_code)?;
                    println!("Forgot {}", room_code);
                }
            }
            SessionEnd::Disconnected => println!("Disconnected from {}", room_code),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    info!("Server: {}", args.server);
    info!("Data directory: {}", data_dir.display());

    let client = Client::open(&args.server, &data_dir)?;

    // Drop anything that expired while the client was not running
    client.ledger.sweep()?;

    match args.command {
        Commands::Create {
            auto_delete,
            password,
            name,
        } => client.create(auto_delete, password.as_deref(), name.as_deref()).await,
        Commands::Join {
            room_code,
            password,
            url,
            name,
        } => {
            let (room_code, password) = match (url, room_code, password) {
                (Some(url), _, _) => cli::parse_join_url(&url)?,
                (None, Some(code), Some(password)) => (code, password),
                _ => anyhow::bail!("Provide a room code and password, or --url <join link>"),
            };
            client.join(&room_code, &password, name.as_deref()).await
        }
        Commands::Open { room_code, name } => client.reopen(&room_code, name.as_deref()).await,
        Commands::Rooms => client.list_rooms(),
        Commands::Forget { room_code } => client.forget(&room_code),
        Commands::Info { room_code } => {
            let room = client.cached(&room_code)?;
            client.info(&room).await
        }
        Commands::Password { room_code } => {
            let room = client.cached(&room_code)?;
            client.password(&room).await
        }
        Commands::Qr { room_code, save } => {
            let room = client.cached(&room_code)?;
            client.qr(&room, save.as_deref()).await
        }
        Commands::Delete { room_code } => {
            let room = client.cached(&room_code)?;
            client.delete(&room).await
        }
    }
}
