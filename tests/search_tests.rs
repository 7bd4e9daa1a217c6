use chess::{Board, MoveGen};
use halcyon::eval::Evaluator;
use halcyon::score;
use halcyon::search::{SearchLimits, Searcher};
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn searcher() -> Searcher {
    Searcher::new(
        8,
        Arc::new(Evaluator::new()),
        Arc::new(AtomicBool::new(false)),
    )
}

fn depth(d: i32) -> SearchLimits {
    SearchLimits {
        time_ms: 30_000,
        depth: d,
        infinite: false,
    }
}

#[test]
fn mate_in_one_is_found_and_scored_as_mate() {
    let board = Board::from_str("1k6/ppp5/8/8/8/8/8/K2R4 w - - 0 1").unwrap();
    let result = searcher().go(&board, depth(3));
    assert_eq!(result.best_move.unwrap().to_string(), "d1d8");
    assert!(score::is_mate_score(result.best_score));
}

#[test]
fn mate_in_two_reports_correct_distance() {
    // Rook ladder: 1.Rg7 Kb8 (forced) 2.Rf8# — mate in three plies.
    let board = Board::from_str("k7/8/8/8/8/8/6R1/5R1K w - - 0 1").unwrap();
    let result = searcher().go(&board, depth(6));
    assert!(score::is_mate_score(result.best_score));
    assert_eq!(result.best_score, score::mate_score(3));
}

#[test]
fn stalemate_root_yields_no_move() {
    let board = Board::from_str("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
    let result = searcher().go(&board, depth(4));
    assert!(result.best_move.is_none());
    assert_eq!(result.best_score, 0);
}

#[test]
fn checkmated_root_yields_no_move() {
    let board = Board::from_str("R5k1/5ppp/8/8/8/8/8/6K1 b - - 0 1").unwrap();
    let result = searcher().go(&board, depth(4));
    assert!(result.best_move.is_none());
}

#[test]
fn search_is_deterministic_across_fresh_searchers() {
    let board = Board::from_str(
        "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
    )
    .unwrap();
    let a = searcher().go(&board, depth(4));
    let b = searcher().go(&board, depth(4));
    assert_eq!(a.best_move, b.best_move);
    assert_eq!(a.best_score, b.best_score);
}

#[test]
fn best_move_is_always_legal() {
    let fens = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    ];
    for fen in fens {
        let board = Board::from_str(fen).unwrap();
        let result = searcher().go(&board, depth(3));
        let mv = result.best_move.expect("legal moves exist");
        assert!(board.legal(mv), "illegal best move {mv} for {fen}");
    }
}

#[test]
fn quiescence_does_not_hang_pieces_at_depth_one() {
    // Caro-Kann shape: the d5 pawn is guarded by c6, so Nxd5 loses a
    // knight for a pawn. Quiescence must see the recapture at depth 1.
    let board =
        Board::from_str("rnbqkbnr/pp2pppp/2p5/3p4/8/2N5/PPPPPPPP/R1BQKBNR w KQkq - 0 3")
            .unwrap();
    let result = searcher().go(&board, depth(1));
    assert_ne!(result.best_move.unwrap().to_string(), "c3d5");
}

#[test]
fn depth_zero_limit_means_iterate() {
    // depth 0 iterates internally; with a tight clock the search still
    // returns some legal move.
    let board = Board::default();
    let limits = SearchLimits {
        time_ms: 50,
        depth: 0,
        infinite: false,
    };
    let result = searcher().go(&board, limits);
    let mv = result.best_move.expect("startpos has moves");
    let legal: Vec<_> = MoveGen::new_legal(&board).collect();
    assert!(legal.contains(&mv));
}
