use std::str::FromStr;
use corvid::board::Board;
use corvid::nnue::NnueState;
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_evaluation(c: &mut Criterion) {
    corvid::board::init();
    let positions = vec![
        ("startpos", Board::default()),
        ("middlegame", Board::from_str("r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4").unwrap()),
        ("endgame", Board::from_str("8/5k2/8/8/8/8/4K3/4R3 w - - 0 1").unwrap()),
        ("complex", Board::from_str("r1bq1rk1/pp2ppbp/2np2p1/2n5/P3PP2/N1P2N2/1PB3PP/R1B1QRK1 b - - 0 10").unwrap()),
    ];
    for (name, board) in &positions {
        c.bench_function(&format!("eval_{}", name), |b| {
            b.iter(|| {
                let mut nnue = NnueState::new();
                nnue.set_board(board);
                nnue.evaluate(0, board.side_to_move())
            })
        });
    }
}

fn bench_incremental_update(c: &mut Criterion) {
    corvid::board::init();
    let board = Board::default();
    let mv = corvid::board::MoveGen::new_legal(&board).next().unwrap();

    c.bench_function("nnue_incremental_make_move", |b| {
        b.iter(|| {
            let mut nnue = NnueState::new();
            nnue.set_board(&board);
            nnue.make_move(0, &board, mv);
            nnue.evaluate(1, board.side_to_move())
        })
    });
}

criterion_group!(benches, bench_evaluation, bench_incremental_update);
criterion_main!(benches);
