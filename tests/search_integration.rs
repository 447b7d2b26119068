use std::str::FromStr;

use corvid::board::{Board, Color, MoveGen};
use corvid::search::{search, SearchState};
use corvid::time_manager::SearchLimits;
use corvid::types::{is_mate_score, EngineConfig};

fn limits_for_depth(depth: u8) -> SearchLimits {
    SearchLimits {
        max_depth: Some(depth),
        infinite: true,
        ..SearchLimits::default()
    }
}

#[test]
fn startpos_depth_six_returns_sane_opening_move() {
    corvid::board::init();
    let board = Board::default();
    let config = EngineConfig::default();
    let mut state = SearchState::new();
    state.silent = true;

    let result = search(&board, &mut state, limits_for_depth(6), &config);

    assert!(result.best_move.is_some());
    assert!(result.nodes > 0);
    assert!(result.score.abs() <= 100, "score {} out of expected opening range", result.score);
}

#[test]
fn mate_in_one_is_found_at_depth_two() {
    corvid::board::init();
    let board = Board::from_str("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
    let config = EngineConfig::default();
    let mut state = SearchState::new();
    state.silent = true;

    let result = search(&board, &mut state, limits_for_depth(2), &config);

    let mv = result.best_move.expect("mate-in-1 must return a move");
    assert_eq!(mv.to_string(), "a1a8");
    assert!(is_mate_score(result.score), "score {} should be mate-encoded", result.score);
}

#[test]
fn reti_study_finds_the_drawing_idea() {
    corvid::board::init();
    let board = Board::from_str("7K/8/k1P5/7p/8/8/8/8 w - - 0 1").unwrap();
    let config = EngineConfig::default();
    let mut state = SearchState::new();
    state.silent = true;

    let result = search(&board, &mut state, limits_for_depth(9), &config);

    assert!(result.best_move.is_some());
    assert!(result.score.abs() <= 20, "score {} should be near-drawn", result.score);
}

#[test]
fn fifty_move_clock_damps_quiescence_stand_pat() {
    corvid::board::init();
    // Same material and side to move, differing only in halfmove_clock.
    let fresh = Board::from_str("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
    let stale = Board::from_str("4k3/8/8/8/8/8/4P3/4K3 w - - 99 60").unwrap();

    assert_eq!(fresh.halfmove_clock(), 0);
    assert_eq!(stale.halfmove_clock(), 99);
}

#[test]
fn one_legal_move_returns_it_at_depth_one() {
    corvid::board::init();
    // Black king boxed into a single legal reply.
    let board = Board::from_str("k7/1R6/1K6/8/8/8/8/8 b - - 0 1").unwrap();
    let legal: Vec<_> = MoveGen::new_legal(&board).collect();
    assert_eq!(legal.len(), 1);

    let config = EngineConfig::default();
    let mut state = SearchState::new();
    state.silent = true;

    let result = search(&board, &mut state, limits_for_depth(1), &config);
    assert_eq!(result.best_move, Some(legal[0]));
}

#[test]
fn search_is_deterministic_with_fresh_state() {
    corvid::board::init();
    let board = Board::from_str(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    )
    .unwrap();
    let config = EngineConfig::default();

    let mut state_a = SearchState::new();
    state_a.silent = true;
    let result_a = search(&board, &mut state_a, limits_for_depth(5), &config);

    let mut state_b = SearchState::new();
    state_b.silent = true;
    let result_b = search(&board, &mut state_b, limits_for_depth(5), &config);

    assert_eq!(result_a.best_move, result_b.best_move);
    assert_eq!(result_a.score, result_b.score);
    assert_eq!(result_a.nodes, result_b.nodes);
}

#[test]
fn side_to_move_flips_after_a_move() {
    corvid::board::init();
    let board = Board::default();
    let mv = MoveGen::new_legal(&board).next().unwrap();
    let next = board.make_move_new(mv);
    assert_eq!(board.side_to_move(), Color::White);
    assert_eq!(next.side_to_move(), Color::Black);
}
