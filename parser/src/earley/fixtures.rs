use rustc_hash::FxHashMap;

use crate::api::{DirectorSetEntry, GrammarTables, NO_COORDINATE};

// Root: Example1 | Example2;
// Example1: A | B;  A: 'x';  B: 'x';
// Example2: X X;    X: 'x' | 'x' 'x';
pub fn amber_tables() -> GrammarTables {
    #[rustfmt::skip]
    let grammar = vec![
        0,
        0, 6, 50000, -1, 10,
        10, 14, -6, 1,
        0, 30, -6, 2,
        18, 22, -14, 3,
        0, 26, -14, 4,
        0, 50120, -22, 5,
        0, 50120, -26, 6,
        0, 35, 35, -30, 7,
        39, 50120, -35, 8,
        0, 50120, 50120, -35, 9,
        0,
    ];
    #[rustfmt::skip]
    let annotation = vec![
        0,
        0, 0, 50000, -1, 0,
        10, 0, -6, -1,
        0, 0, -6, -1,
        18, 0, -14, -1,
        0, 0, -14, -1,
        0, 50120, -22, -1,
        0, 50120, -26, -1,
        0, 0, 0, -30, -1,
        39, 50120, -35, -1,
        0, 50120, 50120, -35, -1,
        0,
    ];
    let mut coordinate = vec![NO_COORDINATE; grammar.len()];
    for (idx, c) in [
        (2, 3005),
        (5, 3005),
        (7, 4004),
        (9, 4011),
        (11, 6004),
        (13, 6011),
        (15, 10004),
        (17, 10004),
        (19, 12004),
        (21, 12004),
        (25, 16003),
        (29, 20003),
        (31, 24004),
        (32, 24006),
        (34, 24004),
        (38, 28003),
        (43, 30003),
    ] {
        coordinate[idx] = c;
    }

    let mut names = FxHashMap::default();
    for (idx, n) in [
        (1, "YYSTART"),
        (6, "Root"),
        (14, "Example1"),
        (22, "A"),
        (26, "B"),
        (30, "Example2"),
        (35, "X"),
    ] {
        names.insert(idx, n.to_string());
    }

    GrammarTables {
        grammar,
        annotation,
        coordinate,
        director_sets: (1..=10)
            .map(|rule| DirectorSetEntry {
                rule,
                tokens: vec![120],
            })
            .collect(),
        names,
        token_names: FxHashMap::default(),
        transparent: vec![],
    }
}

/// `%prio 1` on `Example1: A`, `%prio 2` on `Example1: B`.
pub fn prioritized_amber() -> GrammarTables {
    let mut t = amber_tables();
    t.annotation[17] = 1;
    t.annotation[21] = 2;
    t
}

/// Prioritized, plus an annotation on the second `X` of `Example2`.
pub fn annotated_amber(member_annotation: i32) -> GrammarTables {
    let mut t = prioritized_amber();
    t.annotation[32] = member_annotation;
    t
}
