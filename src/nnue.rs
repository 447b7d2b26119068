//! Quantized NNUE evaluator: a single-king-bucket HalfKP-style feature set feeding a
//! 768->64->1 network, with an incrementally maintained accumulator stack. See
//! SPEC_FULL.md §4.4.

use crate::board::{Board, ChessMove, Color, Piece};
use crate::error::{EngineError, EngineResult};
use crate::types::{Score, MAX_PLY};

pub const N_INPUTS: usize = 768; // 12 piece types (6 x 2 colors) * 64 squares
pub const N_HIDDEN: usize = 64;
pub const QA: i32 = 255;
pub const QB: i32 = 64;
pub const OUTPUT_SCALE: i32 = 400;

/// Quantized network weights. `w0`/`b0` are the feature-transformer (accumulator) layer,
/// `w1`/`b1` the single output neuron taking both perspectives' accumulators.
pub struct NnueWeights {
    w0: Box<[[i16; N_HIDDEN]; N_INPUTS]>,
    b0: Box<[i16; N_HIDDEN]>,
    w1: Box<[[i16; N_HIDDEN]; 2]>,
    b1: i16,
}

impl NnueWeights {
    /// An all-zero network, used when no weight file is supplied. Always evaluates to
    /// material-blind zero; useful for plumbing tests that don't care about eval quality.
    fn zeroed() -> Self {
        Self {
            w0: Box::new([[0; N_HIDDEN]; N_INPUTS]),
            b0: Box::new([0; N_HIDDEN]),
            w1: Box::new([[0; N_HIDDEN]; 2]),
            b1: 0,
        }
    }

    /// Load quantized weights from a flat little-endian binary file:
    /// w0 (N_INPUTS*N_HIDDEN i16) | b0 (N_HIDDEN i16) | w1 (2*N_HIDDEN i16) | b1 (i16).
    pub fn load(path: &str) -> EngineResult<Self> {
        let bytes = std::fs::read(path)?;
        let expected = (N_INPUTS * N_HIDDEN + N_HIDDEN + 2 * N_HIDDEN + 1) * 2;
        if bytes.len() != expected {
            return Err(EngineError::Nnue(format!(
                "bad network file size: expected {expected} bytes, got {}",
                bytes.len()
            )));
        }

        let mut cursor = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]));
        let mut net = Self::zeroed();

        for i in 0..N_INPUTS {
            for j in 0..N_HIDDEN {
                net.w0[i][j] = cursor.next().unwrap();
            }
        }
        for j in 0..N_HIDDEN {
            net.b0[j] = cursor.next().unwrap();
        }
        for side in 0..2 {
            for j in 0..N_HIDDEN {
                net.w1[side][j] = cursor.next().unwrap();
            }
        }
        net.b1 = cursor.next().unwrap();

        Ok(net)
    }
}

/// Index into the feature transformer for (perspective, piece, color, square).
#[inline]
fn feature_index(perspective: Color, piece: Piece, color: Color, sq_index: usize) -> usize {
    let relative_sq = match perspective {
        Color::White => sq_index,
        Color::Black => sq_index ^ 56, // vertical flip
    };
    let color_offset = if color == perspective { 0 } else { 1 };
    (piece.to_index() * 2 + color_offset) * 64 + relative_sq
}

/// One perspective's accumulator: the pre-activation hidden layer, kept in sync
/// incrementally as pieces move rather than recomputed from scratch each ply.
#[derive(Clone, Copy)]
struct Accumulator {
    v: [i16; N_HIDDEN],
}

impl Accumulator {
    fn from_bias(bias: &[i16; N_HIDDEN]) -> Self {
        Self { v: *bias }
    }

    fn add(&mut self, weights: &NnueWeights, idx: usize) {
        for j in 0..N_HIDDEN {
            self.v[j] = self.v[j].saturating_add(weights.w0[idx][j]);
        }
    }

    fn remove(&mut self, weights: &NnueWeights, idx: usize) {
        for j in 0..N_HIDDEN {
            self.v[j] = self.v[j].saturating_sub(weights.w0[idx][j]);
        }
    }
}

#[inline]
fn clipped_relu(x: i16) -> i32 {
    (x as i32).clamp(0, QA)
}

/// Tracks the evaluator state across the search stack: one accumulator pair per ply,
/// refreshed from scratch at the root and updated incrementally on `make_move`.
pub struct NnueState {
    weights: NnueWeights,
    stack: Vec<[Accumulator; 2]>,
}

impl NnueState {
    pub fn new() -> Self {
        let weights = NnueWeights::zeroed();
        Self::with_weights(weights)
    }

    pub fn from_file(path: &str) -> EngineResult<Self> {
        Ok(Self::with_weights(NnueWeights::load(path)?))
    }

    fn with_weights(weights: NnueWeights) -> Self {
        let base = [
            Accumulator::from_bias(&weights.b0),
            Accumulator::from_bias(&weights.b0),
        ];
        Self {
            weights,
            stack: vec![base; MAX_PLY + 1],
        }
    }

    /// Rebuild both accumulators from scratch for `board`, at stack slot 0 (the root).
    pub fn set_board(&mut self, board: &Board) {
        let mut acc = [
            Accumulator::from_bias(&self.weights.b0),
            Accumulator::from_bias(&self.weights.b0),
        ];
        for piece in Piece::ALL {
            for color in [Color::White, Color::Black] {
                let bb = board.pieces(piece) & board.color_combined(color);
                for sq in bb.iter() {
                    for (perspective, accm) in
                        [Color::White, Color::Black].into_iter().zip(acc.iter_mut())
                    {
                        let idx = feature_index(perspective, piece, color, sq.to_index());
                        accm.add(&self.weights, idx);
                    }
                }
            }
        }
        self.stack[0] = acc;
    }

    /// Incrementally derive the accumulator at `ply` from `ply - 1` by applying `mv`.
    /// `board` is the position *before* `mv` is played.
    pub fn make_move(&mut self, ply: usize, board: &Board, mv: ChessMove) {
        let us = board.side_to_move();
        let them = !us;
        let src = mv.get_source();
        let dst = mv.get_dest();
        let moved = board.piece_on(src).expect("no piece on source square");
        let captured = board.piece_on(dst);

        let mut acc = self.stack[ply - 1];

        for (perspective, accm) in [Color::White, Color::Black].into_iter().zip(acc.iter_mut()) {
            let from_idx = feature_index(perspective, moved, us, src.to_index());
            accm.remove(&self.weights, from_idx);

            if let Some(cap) = captured {
                let cap_idx = feature_index(perspective, cap, them, dst.to_index());
                accm.remove(&self.weights, cap_idx);
            }

            let is_ep = moved == Piece::Pawn && board.en_passant() == Some(dst) && captured.is_none();
            if is_ep {
                let ep_sq = match us {
                    Color::White => dst.to_index() - 8,
                    Color::Black => dst.to_index() + 8,
                };
                let ep_idx = feature_index(perspective, Piece::Pawn, them, ep_sq);
                accm.remove(&self.weights, ep_idx);
            }

            let placed = mv.get_promotion().unwrap_or(moved);
            let to_idx = feature_index(perspective, placed, us, dst.to_index());
            accm.add(&self.weights, to_idx);

            if moved == Piece::King {
                let from_file = src.to_index() % 8;
                let to_file = dst.to_index() % 8;
                let rank_base = src.to_index() - from_file;
                if from_file == 4 && to_file == 6 {
                    accm.remove(&self.weights, feature_index(perspective, Piece::Rook, us, rank_base + 7));
                    accm.add(&self.weights, feature_index(perspective, Piece::Rook, us, rank_base + 5));
                } else if from_file == 4 && to_file == 2 {
                    accm.remove(&self.weights, feature_index(perspective, Piece::Rook, us, rank_base));
                    accm.add(&self.weights, feature_index(perspective, Piece::Rook, us, rank_base + 3));
                }
            }
        }

        self.stack[ply] = acc;
    }

    /// Evaluate from `side_to_move`'s perspective using the accumulator at `ply`.
    pub fn evaluate(&self, ply: usize, side_to_move: Color) -> Score {
        let acc = &self.stack[ply];
        let (us, them) = match side_to_move {
            Color::White => (&acc[0], &acc[1]),
            Color::Black => (&acc[1], &acc[0]),
        };

        let mut sum: i64 = 0;
        for j in 0..N_HIDDEN {
            sum += clipped_relu(us.v[j]) as i64 * self.weights.w1[0][j] as i64;
            sum += clipped_relu(them.v[j]) as i64 * self.weights.w1[1][j] as i64;
        }
        sum += self.weights.b1 as i64;

        ((sum * OUTPUT_SCALE as i64) / (QA as i64 * QB as i64)) as Score
    }
}

impl Default for NnueState {
    fn default() -> Self {
        Self::new()
    }
}
