use gamex::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

const USAGE: &str = "usage: party host | party join <room-code>";

const HELP: &str = "commands:
  mode <easy|hard|hardest> <rounds>   pick the next game (moderator)
  start                               start the game (moderator)
  choice <love|friendship|passion> <round>
  name <display name>
  roster
  quit";

enum Role {
    Host,
    Join(RoomCode),
}

fn parse_args() -> Result<Role, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd] if cmd == "host" => Ok(Role::Host),
        [cmd, code] if cmd == "join" => RoomCode::parse(code)
            .map(Role::Join)
            .map_err(|e| e.to_string()),
        _ => Err(USAGE.to_string()),
    }
}

fn parse_category(raw: &str) -> Option<EmotionCategory> {
    EmotionCategory::ALL
        .into_iter()
        .find(|category| category.to_string() == raw)
}

fn parse_mode(raw: &str) -> Option<GameMode> {
    [GameMode::Easy, GameMode::Hard, GameMode::Hardest]
        .into_iter()
        .find(|mode| mode.to_string() == raw)
}

// ---------------------------------------------------------------------------
// Event printing
// ---------------------------------------------------------------------------

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::PlayerConnected(player) => {
            println!("+ {} joined", player.display_name);
        }
        SessionEvent::PlayerDisconnected { player_id, was_moderator } => {
            if *was_moderator {
                println!("- the moderator left; the room is closed");
            } else {
                println!("- {player_id} left");
            }
        }
        SessionEvent::RosterUpdated(players) => {
            let names: Vec<&str> = players.iter().map(|p| p.display_name.as_str()).collect();
            println!("roster: {}", names.join(", "));
        }
        SessionEvent::ChoiceReceived(choice) => {
            println!("{} chose {} (round {})", choice.player_id, choice.category, choice.round);
        }
        SessionEvent::GameStarted(snapshot) => {
            println!("game on: {} for {} rounds", snapshot.mode, snapshot.total_rounds);
        }
        SessionEvent::ModeChanged { mode, total_rounds } => {
            println!("next game: {mode}, {total_rounds} rounds");
        }
        SessionEvent::NextTurn { current_player_id, .. } => {
            println!("turn: {current_player_id}");
        }
        SessionEvent::GameOver(summary) => {
            println!(
                "game over: {:?}. {} (safe score {:.0}, {})",
                summary.verdict, summary.reason, summary.safe_score, summary.safety_label
            );
        }
        SessionEvent::NameUpdated { player_id, display_name } => {
            println!("{player_id} is now {display_name}");
        }
        SessionEvent::Error(notice) => {
            println!("! {}: {}", notice.code, notice.message);
        }
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

async fn handle_line<T: Transport>(
    session: &SessionHandle<T>,
    line: &str,
) -> Result<bool, GamexError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["quit"] => return Ok(false),
        ["start"] => {
            if session.start_game().await?.is_none() {
                println!("only the moderator can start");
            }
        }
        ["mode", mode, rounds] => match (parse_mode(mode), rounds.parse()) {
            (Some(mode), Ok(rounds)) => session.broadcast_mode_selection(mode, rounds).await?,
            _ => println!("{HELP}"),
        },
        ["choice", category, round] => match (parse_category(category), round.parse()) {
            (Some(category), Ok(round)) => session.send_choice(category, round).await?,
            _ => println!("{HELP}"),
        },
        ["name", rest @ ..] if !rest.is_empty() => {
            session.update_display_name(rest.join(" ")).await?;
        }
        ["roster"] => {
            for player in session.roster().await? {
                let tag = if player.is_moderator { " (moderator)" } else { "" };
                println!("  {} [{}]{tag}", player.display_name, player.id);
            }
        }
        _ => println!("{HELP}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gamex_session=info".parse()?),
        )
        .init();

    let role = parse_args()?;
    let bind = std::env::var("GAMEX_BIND").unwrap_or_else(|_| "127.0.0.1:0".to_string());
    let name = std::env::var("GAMEX_NAME").unwrap_or_else(|_| "Player".to_string());
    let transport = WebSocketTransport::new(bind);
    let builder = PartyBuilder::new().display_name(name);

    let session = match role {
        Role::Host => {
            let (session, code) = builder.host(transport).await?;
            println!("hosting; guests join with: party join {code}");
            session
        }
        Role::Join(code) => {
            let session = builder.join(transport, &code).await?;
            println!("joined {code}");
            session
        }
    };
    session.events().subscribe_all(print_event);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle_line(&session, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(GamexError::Session(SessionError::Closed)) => {
                println!("session closed");
                break;
            }
            Err(e) => println!("! {e}"),
        }
        if session.state().await == SessionState::Closed {
            break;
        }
    }

    session.disconnect().await;
    tracing::info!("bye");
    Ok(())
}
