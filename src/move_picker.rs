//! Staged, lazy move ordering: TT move, good captures/promotions (by SEE), killers,
//! quiets (by history), then bad captures. See SPEC_FULL.md §4.5.

use arrayvec::ArrayVec;

use crate::board::{BitBoard, Board, ChessMove, Color, MoveGen, Piece, EMPTY};
use crate::history::History;
use crate::see::see;
use crate::types::{Score, GOOD_NOISY_SEE_BASE, GOOD_NOISY_SEE_SCALE, PVAL};

const MAX_MOVES: usize = 218;

#[derive(Clone, Copy)]
struct Candidate {
    mv: ChessMove,
    score: Score,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    TtMove,
    GenNoisy,
    GoodNoisy,
    Killer,
    GenQuiet,
    Quiet,
    BadNoisy,
    Done,
    QsGenNoisy,
    QsNoisy,
}

fn piece_index(piece: Piece) -> usize {
    piece.to_index()
}

/// Lazily yields legal moves in the stage order described in SPEC_FULL.md §4.5.
pub struct MovePicker {
    stage: Stage,
    tt_move: Option<ChessMove>,
    killers: [Option<ChessMove>; 2],
    skip_quiets: bool,
    noisy: ArrayVec<Candidate, 64>,
    bad_noisy: ArrayVec<Candidate, 64>,
    quiet: ArrayVec<Candidate, MAX_MOVES>,
    noisy_idx: usize,
    bad_idx: usize,
    quiet_idx: usize,
}

impl MovePicker {
    /// Picker for a negamax node.
    pub fn new(tt_move: Option<ChessMove>, killers: [Option<ChessMove>; 2]) -> Self {
        Self {
            stage: Stage::TtMove,
            tt_move,
            killers,
            skip_quiets: false,
            noisy: ArrayVec::new(),
            bad_noisy: ArrayVec::new(),
            quiet: ArrayVec::new(),
            noisy_idx: 0,
            bad_idx: 0,
            quiet_idx: 0,
        }
    }

    /// Picker for quiescence: captures/promotions/evasions only, no killer/quiet stages.
    pub fn new_quiescence() -> Self {
        Self {
            stage: Stage::QsGenNoisy,
            tt_move: None,
            killers: [None, None],
            skip_quiets: true,
            noisy: ArrayVec::new(),
            bad_noisy: ArrayVec::new(),
            quiet: ArrayVec::new(),
            noisy_idx: 0,
            bad_idx: 0,
            quiet_idx: 0,
        }
    }

    /// Prunes the killer and quiet stages (used by callers that only want noisy moves).
    pub fn skip_quiets(&mut self) {
        self.skip_quiets = true;
    }

    fn generate(&mut self, board: &Board, history: &History) {
        let mut gen = MoveGen::new_legal(board);
        let stm = board.side_to_move();

        let targets = board.color_combined(!stm);
        gen.set_iterator_mask(targets);
        for mv in &mut gen {
            let score = score_noisy(board, history, mv);
            let _ = self.noisy.try_push(Candidate { mv, score });
        }

        if let Some(ep_sq) = board.en_passant() {
            gen.set_iterator_mask(BitBoard::from_square(ep_sq));
            for mv in &mut gen {
                let score = score_noisy(board, history, mv);
                let _ = self.noisy.try_push(Candidate { mv, score });
            }
        }

        gen.set_iterator_mask(!EMPTY);
        for mv in &mut gen {
            if mv.get_promotion().is_some() {
                let score = score_noisy(board, history, mv);
                let _ = self.noisy.try_push(Candidate { mv, score });
            } else {
                let score = score_quiet(board, history, stm, mv);
                let _ = self.quiet.try_push(Candidate { mv, score });
            }
        }
    }

    fn select_next(list: &mut ArrayVec<Candidate, 64>, idx: &mut usize) -> Option<Candidate> {
        if *idx >= list.len() {
            return None;
        }
        let mut best = *idx;
        for i in (*idx + 1)..list.len() {
            if list[i].score > list[best].score {
                best = i;
            }
        }
        list.swap(*idx, best);
        let cand = list[*idx];
        *idx += 1;
        Some(cand)
    }

    fn select_next_quiet(&mut self) -> Option<Candidate> {
        if self.quiet_idx >= self.quiet.len() {
            return None;
        }
        let mut best = self.quiet_idx;
        for i in (self.quiet_idx + 1)..self.quiet.len() {
            if self.quiet[i].score > self.quiet[best].score {
                best = i;
            }
        }
        self.quiet.swap(self.quiet_idx, best);
        let cand = self.quiet[self.quiet_idx];
        self.quiet_idx += 1;
        Some(cand)
    }

    /// Returns the next move in stage order, or `None` once exhausted.
    pub fn next(&mut self, board: &Board, history: &History) -> Option<ChessMove> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::GenNoisy;
                    if let Some(mv) = self.tt_move {
                        if board.legal(mv) {
                            return Some(mv);
                        }
                    }
                }
                Stage::GenNoisy => {
                    self.generate(board, history);
                    self.stage = Stage::GoodNoisy;
                }
                Stage::GoodNoisy => match Self::select_next(&mut self.noisy, &mut self.noisy_idx) {
                    Some(cand) if Some(cand.mv) == self.tt_move => continue,
                    Some(cand) => {
                        let threshold =
                            GOOD_NOISY_SEE_BASE - cand.score * GOOD_NOISY_SEE_SCALE / 64;
                        if see(board, cand.mv, threshold) {
                            return Some(cand.mv);
                        }
                        let _ = self.bad_noisy.try_push(cand);
                    }
                    None => self.stage = Stage::Killer,
                },
                Stage::Killer => {
                    self.stage = Stage::GenQuiet;
                    if !self.skip_quiets {
                        for killer in self.killers {
                            if let Some(mv) = killer {
                                if Some(mv) == self.tt_move {
                                    continue;
                                }
                                if board.legal(mv) {
                                    return Some(mv);
                                }
                            }
                        }
                    }
                }
                Stage::GenQuiet => {
                    if self.skip_quiets {
                        self.stage = Stage::BadNoisy;
                    } else {
                        self.stage = Stage::Quiet;
                    }
                }
                Stage::Quiet => match self.select_next_quiet() {
                    Some(cand) => {
                        if Some(cand.mv) == self.tt_move || self.killers.contains(&Some(cand.mv)) {
                            continue;
                        }
                        return Some(cand.mv);
                    }
                    None => self.stage = Stage::BadNoisy,
                },
                Stage::BadNoisy => {
                    if self.bad_idx >= self.bad_noisy.len() {
                        self.stage = Stage::Done;
                        continue;
                    }
                    let cand = self.bad_noisy[self.bad_idx];
                    self.bad_idx += 1;
                    if Some(cand.mv) == self.tt_move {
                        continue;
                    }
                    return Some(cand.mv);
                }
                Stage::Done => return None,
                Stage::QsGenNoisy => {
                    self.generate_qs(board, history);
                    self.stage = Stage::QsNoisy;
                }
                Stage::QsNoisy => match Self::select_next(&mut self.noisy, &mut self.noisy_idx) {
                    Some(cand) => return Some(cand.mv),
                    None => {
                        self.stage = Stage::Done;
                        continue;
                    }
                },
            }
        }
    }

    fn generate_qs(&mut self, board: &Board, history: &History) {
        let mut gen = MoveGen::new_legal(board);
        let stm = board.side_to_move();

        if !board.checkers().is_empty() {
            // In check: every legal move is an evasion, search all of them.
            gen.set_iterator_mask(!EMPTY);
            for mv in &mut gen {
                let score = score_noisy(board, history, mv);
                let _ = self.noisy.try_push(Candidate { mv, score });
            }
            return;
        }

        let targets = board.color_combined(!stm);
        gen.set_iterator_mask(targets);
        for mv in &mut gen {
            let score = score_noisy(board, history, mv);
            let _ = self.noisy.try_push(Candidate { mv, score });
        }

        if let Some(ep_sq) = board.en_passant() {
            gen.set_iterator_mask(BitBoard::from_square(ep_sq));
            for mv in &mut gen {
                let score = score_noisy(board, history, mv);
                let _ = self.noisy.try_push(Candidate { mv, score });
            }
        }

        gen.set_iterator_mask(!EMPTY);
        for mv in &mut gen {
            if mv.get_promotion().is_some() {
                let score = score_noisy(board, history, mv);
                let _ = self.noisy.try_push(Candidate { mv, score });
            }
        }
    }
}

fn score_noisy(board: &Board, history: &History, mv: ChessMove) -> Score {
    let mut score: Score = 0;
    if let Some(victim) = board.piece_on(mv.get_dest()) {
        score += PVAL[piece_index(victim)];
        score += history.capture_score(mv, victim) / 32;
    } else if board.en_passant() == Some(mv.get_dest()) {
        score += PVAL[Piece::Pawn.to_index()];
    }
    if let Some(promo) = mv.get_promotion() {
        score += PVAL[piece_index(promo)] - PVAL[Piece::Pawn.to_index()];
    }
    score
}

fn score_quiet(board: &Board, history: &History, stm: Color, mv: ChessMove) -> Score {
    let _ = board;
    history.quiet_score(stm, mv)
}
