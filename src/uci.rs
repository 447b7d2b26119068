use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::board::{Board, ChessMove, File, Piece, Rank, Square};
use crate::config::Cli;
use crate::error::EngineError;
use crate::search::{self, SearchState};
use crate::time_manager::SearchLimits;
use crate::types::EngineConfig;

/// Runs the UCI command loop on stdin/stdout until `quit` or EOF. UCI protocol lines go to
/// stdout via `println!`; operator diagnostics go through `tracing` to stderr.
pub fn run(cli: &Cli) -> Result<(), EngineError> {
    let stdin = io::stdin();

    let mut board = Board::default();
    let mut config = EngineConfig {
        hash_mb: cli.hash,
        move_overhead_ms: cli.move_overhead,
        ..EngineConfig::default()
    };

    let mut search_state: Option<SearchState> = Some({
        let mut ss = SearchState::new();
        ss.resize_tt(config.hash_mb);
        if let Some(path) = &cli.nnue {
            match crate::nnue::NnueState::from_file(path) {
                Ok(nnue) => ss.nnue = nnue,
                Err(e) => tracing::warn!(error = %e, path, "failed to load NNUE file, using zero network"),
            }
        }
        ss
    });
    let mut stop_flag: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let mut search_thread: Option<thread::JoinHandle<SearchState>> = None;
    let mut position_history: Vec<u64> = Vec::new();
    // Limits captured from a "go ponder" so "ponderhit" can start the real timed search.
    let mut pending_ponder_limits: Option<SearchLimits> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        match tokens[0] {
            "uci" => {
                println!("id name corvid");
                println!("id author corvid contributors");
                println!("option name Hash type spin default 64 min 1 max 3072");
                println!("option name MoveOverhead type spin default 10 min 0 max 1000");
                println!("option name Threads type spin default 1 min 1 max 1");
                println!("option name SoftNodes type check default false");
                println!("option name SoftHardMult type spin default 1 min 1 max 20");
                println!("option name Ponder type check default false");
                println!("uciok");
            }
            "isready" => {
                wait_for_search(&mut search_thread, &mut search_state);
                println!("readyok");
            }
            "ucinewgame" => {
                wait_for_search(&mut search_thread, &mut search_state);
                pending_ponder_limits = None;
                board = Board::default();
                position_history.clear();
                if let Some(ref mut ss) = search_state {
                    ss.reset();
                }
            }
            "position" => {
                wait_for_search(&mut search_thread, &mut search_state);
                pending_ponder_limits = None;
                if let Err(e) = parse_position(&tokens, &mut board, &mut position_history) {
                    tracing::warn!(error = %e, "rejected position command");
                    println!("info string {e}");
                }
            }
            "go" => {
                wait_for_search(&mut search_thread, &mut search_state);

                let limits = parse_go(&tokens, &board);
                let is_ponder = tokens.iter().any(|&t| t == "ponder");

                let mut ss = search_state.take().expect("search state missing");
                ss.position_history = position_history.clone();

                let flag = Arc::new(AtomicBool::new(false));
                stop_flag = flag.clone();

                let board_copy = board;
                let config_copy = config;

                if is_ponder {
                    pending_ponder_limits = Some(limits);
                    search_thread = Some(thread::spawn(move || {
                        search::ponder(&board_copy, &mut ss, flag);
                        ss
                    }));
                } else {
                    pending_ponder_limits = None;
                    ss.stop = flag;
                    search_thread = Some(thread::spawn(move || {
                        let result = search::search(&board_copy, &mut ss, limits, &config_copy);
                        match result.best_move {
                            Some(m) => println!("bestmove {}", m),
                            None => println!("bestmove 0000"),
                        }
                        ss
                    }));
                }
            }
            "ponderhit" => {
                stop_flag.store(true, Ordering::SeqCst);
                wait_for_search(&mut search_thread, &mut search_state);

                if let Some(limits) = pending_ponder_limits.take() {
                    let mut ss = search_state.take().expect("search state missing");
                    ss.position_history = position_history.clone();

                    let flag = Arc::new(AtomicBool::new(false));
                    stop_flag = flag.clone();
                    ss.stop = flag;

                    let board_copy = board;
                    let config_copy = config;

                    search_thread = Some(thread::spawn(move || {
                        let result = search::search(&board_copy, &mut ss, limits, &config_copy);
                        match result.best_move {
                            Some(m) => println!("bestmove {}", m),
                            None => println!("bestmove 0000"),
                        }
                        ss
                    }));
                } else {
                    tracing::warn!("ponderhit received with no pending ponder search");
                }
            }
            "stop" => {
                pending_ponder_limits = None;
                stop_flag.store(true, Ordering::SeqCst);
                wait_for_search(&mut search_thread, &mut search_state);
            }
            "setoption" => {
                wait_for_search(&mut search_thread, &mut search_state);
                if let Some(ref mut ss) = search_state {
                    if let Err(e) = apply_setoption(&tokens, &mut config, ss) {
                        tracing::warn!(error = %e, "setoption rejected");
                        println!("info string {e}");
                    }
                }
            }
            "quit" => {
                stop_flag.store(true, Ordering::SeqCst);
                wait_for_search(&mut search_thread, &mut search_state);
                break;
            }
            "d" | "print" => {
                println!("{}", board);
            }
            other => {
                tracing::warn!(command = other, "unrecognized UCI command");
            }
        }
    }

    Ok(())
}

/// Wait for a running search thread to finish and recover the `SearchState`.
fn wait_for_search(
    handle: &mut Option<thread::JoinHandle<SearchState>>,
    state: &mut Option<SearchState>,
) {
    if let Some(h) = handle.take() {
        match h.join() {
            Ok(ss) => *state = Some(ss),
            Err(_) => {
                tracing::error!("search thread panicked, starting a fresh search state");
                *state = Some(SearchState::new());
            }
        }
    }
}

fn parse_go(tokens: &[&str], board: &Board) -> SearchLimits {
    let mut limits = SearchLimits::default();
    let mut wtime = None;
    let mut btime = None;
    let mut winc = None;
    let mut binc = None;

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                if i < tokens.len() {
                    limits.max_depth = tokens[i].parse().ok();
                }
            }
            "nodes" => {
                i += 1;
                if i < tokens.len() {
                    limits.max_nodes = tokens[i].parse().ok();
                }
            }
            "movetime" => {
                i += 1;
                if i < tokens.len() {
                    limits.movetime = tokens[i].parse().ok();
                }
            }
            "wtime" => {
                i += 1;
                if i < tokens.len() {
                    wtime = tokens[i].parse().ok();
                }
            }
            "btime" => {
                i += 1;
                if i < tokens.len() {
                    btime = tokens[i].parse().ok();
                }
            }
            "winc" => {
                i += 1;
                if i < tokens.len() {
                    winc = tokens[i].parse().ok();
                }
            }
            "binc" => {
                i += 1;
                if i < tokens.len() {
                    binc = tokens[i].parse().ok();
                }
            }
            "movestogo" => {
                i += 1; // accepted for protocol compatibility; budget derives from wtime/btime+inc only
            }
            "infinite" => {
                limits.infinite = true;
            }
            _ => {}
        }
        i += 1;
    }

    let (my_time, my_inc) = match board.side_to_move() {
        crate::board::Color::White => (wtime, winc),
        crate::board::Color::Black => (btime, binc),
    };
    limits.time_remaining_ms = my_time;
    limits.increment_ms = my_inc;

    limits
}

fn parse_position(
    tokens: &[&str],
    board: &mut Board,
    history: &mut Vec<u64>,
) -> Result<(), EngineError> {
    if tokens.len() < 2 {
        return Err(EngineError::Protocol("position: missing arguments".into()));
    }

    let mut idx = 1;

    if tokens[idx] == "startpos" {
        *board = Board::default();
        idx += 1;
    } else if tokens[idx] == "fen" {
        idx += 1;
        let mut fen_parts: Vec<&str> = Vec::new();
        while idx < tokens.len() && tokens[idx] != "moves" && fen_parts.len() < 6 {
            fen_parts.push(tokens[idx]);
            idx += 1;
        }
        if fen_parts.len() < 4 {
            return Err(EngineError::Protocol("position fen: too few fields".into()));
        }
        let fen_str = fen_parts.join(" ");
        *board = Board::from_str(&fen_str)
            .map_err(|_| EngineError::Protocol(format!("invalid FEN: {fen_str}")))?;
    } else {
        return Err(EngineError::Protocol(format!("unknown position kind: {}", tokens[idx])));
    }

    history.clear();
    history.push(board.get_hash());

    if idx < tokens.len() && tokens[idx] == "moves" {
        idx += 1;
        for &move_str in &tokens[idx..] {
            match parse_uci_move(board, move_str) {
                Some(m) => {
                    *board = board.make_move_new(m);
                    history.push(board.get_hash());
                }
                None => {
                    return Err(EngineError::Protocol(format!("illegal move in position: {move_str}")));
                }
            }
        }
    }

    Ok(())
}

/// Parse a UCI move string directly into squares + optional promotion piece.
fn parse_uci_move(board: &Board, move_str: &str) -> Option<ChessMove> {
    if move_str.len() < 4 {
        return None;
    }
    let bytes = move_str.as_bytes();

    let src_file = bytes[0].wrapping_sub(b'a');
    let src_rank = bytes[1].wrapping_sub(b'1');
    let dst_file = bytes[2].wrapping_sub(b'a');
    let dst_rank = bytes[3].wrapping_sub(b'1');

    if src_file >= 8 || src_rank >= 8 || dst_file >= 8 || dst_rank >= 8 {
        return None;
    }

    let src = Square::make_square(Rank::from_index(src_rank as usize), File::from_index(src_file as usize));
    let dst = Square::make_square(Rank::from_index(dst_rank as usize), File::from_index(dst_file as usize));

    let promo = if move_str.len() >= 5 {
        match bytes[4] {
            b'q' => Some(Piece::Queen),
            b'r' => Some(Piece::Rook),
            b'b' => Some(Piece::Bishop),
            b'n' => Some(Piece::Knight),
            _ => None,
        }
    } else {
        None
    };

    let mv = ChessMove::new(src, dst, promo);
    if board.legal(mv) {
        Some(mv)
    } else {
        None
    }
}

fn apply_setoption(
    tokens: &[&str],
    config: &mut EngineConfig,
    state: &mut SearchState,
) -> Result<(), EngineError> {
    let name_idx = tokens.iter().position(|&t| t == "name");
    let value_idx = tokens.iter().position(|&t| t == "value");

    let (Some(ni), Some(vi)) = (name_idx, value_idx) else {
        return Err(EngineError::Protocol("setoption: missing name/value".into()));
    };

    let name: String = tokens[ni + 1..vi].join(" ");
    let value: String = tokens[vi + 1..].join(" ");

    match name.to_lowercase().as_str() {
        "hash" => {
            let mb: usize = value
                .parse()
                .map_err(|_| EngineError::Config(format!("Hash: not an integer: {value}")))?;
            if !(1..=3072).contains(&mb) {
                return Err(EngineError::Config(format!("Hash: {mb} out of range [1,3072]")));
            }
            config.hash_mb = mb;
            state.resize_tt(mb);
            Ok(())
        }
        "moveoverhead" => {
            let ms: u64 = value
                .parse()
                .map_err(|_| EngineError::Config(format!("MoveOverhead: not an integer: {value}")))?;
            if ms > 1000 {
                return Err(EngineError::Config(format!("MoveOverhead: {ms} out of range [0,1000]")));
            }
            config.move_overhead_ms = ms;
            Ok(())
        }
        "softnodes" => {
            config.soft_nodes = value.eq_ignore_ascii_case("true");
            Ok(())
        }
        "softhardmult" => {
            let mult: u32 = value
                .parse()
                .map_err(|_| EngineError::Config(format!("SoftHardMult: not an integer: {value}")))?;
            if !(1..=20).contains(&mult) {
                return Err(EngineError::Config(format!("SoftHardMult: {mult} out of range [1,20]")));
            }
            config.soft_hard_mult = mult;
            Ok(())
        }
        "threads" => Ok(()), // reserved, single-thread core
        other => Err(EngineError::Config(format!("unknown option: {other}"))),
    }
}
