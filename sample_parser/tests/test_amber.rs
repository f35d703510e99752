use std::sync::Arc;

use entire::{
    api::{GrammarTables, ParserLimits, ParserOptions},
    earley::CharLexer,
    grammar_builder::{GrammarBuilder, Member, Priority},
    walker, Grammar, Logger, ParseError, Parser,
};
use sample_parser::*;

fn syntax_error_at(tables: GrammarTables, input: &str) -> i64 {
    match check_error(tables, input) {
        ParseError::SyntaxError { pos } => pos,
        e => panic!("expected syntax error for {:?}, got {:?}", input, e),
    }
}

fn ambiguity(tables: GrammarTables, input: &str) -> (i64, String) {
    match check_error(tables, input) {
        ParseError::UnhandledAmbiguity { pos, diagnostic } => (pos, diagnostic),
        e => panic!("expected ambiguity for {:?}, got {:?}", input, e),
    }
}

// S: S | 'a';
fn unit_cycle(prio_unit: u32, prio_char: u32) -> GrammarTables {
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let r1 = b.rule(s, &[Member::Sym(s)]);
    let r2 = b.rule(s, &[Member::Char('a')]);
    b.prio(r1, Priority::Prio(prio_unit));
    b.prio(r2, Priority::Prio(prio_char));
    b.finalize(s).unwrap()
}

// the same grammar with `%disfilter` numbers instead of priorities
fn unit_cycle_disfiltered(n_unit: u32, n_char: u32) -> GrammarTables {
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let r1 = b.rule(s, &[Member::Sym(s)]);
    let r2 = b.rule(s, &[Member::Char('a')]);
    b.prio(r1, Priority::Disfilter(n_unit));
    b.prio(r2, Priority::Disfilter(n_char));
    b.finalize(s).unwrap()
}

// E: E '+' 'n' | 'n';
fn left_recursive() -> GrammarTables {
    let mut b = GrammarBuilder::new();
    let e = b.nonterminal("E");
    b.rule(e, &[Member::Sym(e), Member::Char('+'), Member::Char('n')]);
    b.rule(e, &[Member::Char('n')]);
    b.finalize(e).unwrap()
}

// S: A 'b'; A: ; A: 'a';
fn nullable() -> GrammarTables {
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let a = b.nonterminal("A");
    b.rule(s, &[Member::Sym(a), Member::Char('b')]);
    b.rule(a, &[]);
    b.rule(a, &[Member::Char('a')]);
    b.finalize(s).unwrap()
}

fn sum(n: usize) -> String {
    vec!["n"; n].join("+")
}

#[test]
fn test_amber_prioritized() {
    check_rules(prioritized_amber(), "x", &[10, 1, 4, 6]);
    check_rules(prioritized_amber(), "xx", &[10, 2, 7, 8, 8]);
    check_rules(prioritized_amber(), " x\n x ", &[10, 2, 7, 8, 8]);

    let (pos, diagnostic) = ambiguity(prioritized_amber(), "xxx");
    assert_eq!(pos, 3);
    assert!(diagnostic.contains("for the beginning of ``Example2''"));
}

#[test]
fn test_amber_unannotated_is_ambiguous() {
    for input in ["x", "xx", "xxx"] {
        let (pos, diagnostic) = ambiguity(amber_tables(), input);
        assert_eq!(pos, 1);
        assert!(diagnostic.contains("Two different ``Example1'' derivation trees for the same phrase."));
    }

    let e = check_error(amber_tables(), "x");
    assert!(e
        .to_string()
        .ends_with("1: source text uncovers unhandled grammar ambiguity"));
    assert_eq!(e.exit_code(), 1);
}

#[test]
fn test_amber_short_long() {
    check_rules(annotated_amber(1), "xxx", &[10, 2, 7, 9, 8]);
    check_rules(annotated_amber(2), "xxx", &[10, 2, 7, 8, 9]);
    check_rules(annotated_amber(1), "xxxx", &[10, 2, 7, 9, 9]);
    check_rules(annotated_amber(2), "xxxx", &[10, 2, 7, 9, 9]);
}

#[test]
fn test_amber_syntax_errors() {
    assert_eq!(syntax_error_at(prioritized_amber(), ""), 1);
    assert_eq!(syntax_error_at(prioritized_amber(), "y"), 1);
    assert_eq!(syntax_error_at(prioritized_amber(), "xy"), 2);
    assert_eq!(syntax_error_at(annotated_amber(1), "xxy"), 3);
    assert_eq!(syntax_error_at(amber_tables(), ""), 1);

    let e = check_error(prioritized_amber(), "xy");
    assert_eq!(e.to_string(), "2: syntax error");
    assert_eq!(e.pos(), Some(2));
}

#[test]
fn test_options_do_not_change_results() {
    let variants = [
        ParserOptions {
            hashing: false,
            ..ParserOptions::default()
        },
        ParserOptions {
            lookahead: false,
            ..ParserOptions::default()
        },
        ParserOptions {
            lookahead: false,
            check_viable: false,
            ..ParserOptions::default()
        },
        ParserOptions {
            error_position_correction: false,
            ..ParserOptions::default()
        },
    ];
    for options in variants {
        let mut p = new_parser(prioritized_amber(), options.clone());
        assert_eq!(derive(&mut p, "x").unwrap(), vec![10, 1, 4, 6]);
        assert_eq!(derive(&mut p, "xx").unwrap(), vec![10, 2, 7, 8, 8]);
        let p = new_parser(prioritized_amber(), options.clone());
        assert_eq!(check_error_with(p, "xy"), ParseError::SyntaxError { pos: 2 });

        let mut p = new_parser(annotated_amber(1), options.clone());
        assert_eq!(derive(&mut p, "xxx").unwrap(), vec![10, 2, 7, 9, 8]);

        let mut p = new_parser(left_recursive(), options);
        assert_eq!(derive(&mut p, &sum(3)).unwrap(), vec![3, 1, 1, 2]);
    }
}

#[test]
fn test_detection_off_keeps_first_derivation() {
    let options = ParserOptions {
        detect_ambiguity: false,
        ..ParserOptions::default()
    };
    let mut p = new_parser(amber_tables(), options);
    assert_eq!(derive(&mut p, "x").unwrap(), vec![10, 1, 3, 5]);
    assert_eq!(derive(&mut p, "xx").unwrap(), vec![10, 2, 7, 8, 8]);
}

#[test]
fn test_derivation_matches_tokens() {
    let mut p = new_parser(annotated_amber(2), ParserOptions::default());
    let mut lexvals = p.parse(&mut CharLexer::new("x x x")).unwrap();
    // three 'x', then EOF once as lookahead and once as shifted token
    assert_eq!(lexvals.len(), 5);

    let mut d = p.derivation().unwrap();
    let tree = walker::walk(p.grammar(), &mut d, &mut lexvals).unwrap();
    assert_eq!(tree.rules(), vec![10, 2, 7, 8, 9]);
    let positions: Vec<i64> = tree.tokens().iter().map(|l| l.pos).collect();
    assert_eq!(positions, vec![1, 3, 5, 6]);
    assert!(d.next_rule().unwrap().is_none());
    assert_eq!(lexvals.get_lexval().map(|l| l.pos), Some(6));
    assert!(lexvals.get_lexval().is_none());

    // the forest is not touched by deriving
    d.reset();
    let again: Vec<i32> = d.collect::<anyhow::Result<_>>().unwrap();
    assert_eq!(again, tree.rules());
    assert_eq!(
        p.derivation().unwrap().collect::<anyhow::Result<Vec<_>>>().unwrap(),
        again
    );
}

#[test]
fn test_default_disfilter_takes_larger_number() {
    check_rules(disfiltered_amber(1, 2), "x", &[10, 1, 4, 6]);
    check_rules(disfiltered_amber(2, 1), "x", &[10, 1, 3, 5]);

    assert_eq!(
        check_error(disfiltered_amber(4, 4), "x"),
        ParseError::CallbackContract {
            callback: "disfilter",
            value: 3
        }
    );
}

#[test]
fn test_disfilter_callback() {
    for (answer, expected) in [(1, vec![10, 1, 3, 5]), (2, vec![10, 1, 4, 6])] {
        let (filters, calls) = Recorder::new(answer, 0);
        let mut p = new_parser(disfiltered_amber(5, 6), ParserOptions::default())
            .with_disambiguator(filters);
        assert_eq!(derive(&mut p, "x").unwrap(), expected);
        // closure may meet the collision again, with the alternatives swapped
        let calls = calls.lock().unwrap();
        assert!(!calls.is_empty());
        assert!(calls
            .iter()
            .all(|c| *c == ("disfilter", 5, 6) || *c == ("disfilter", 6, 5)));
    }

    let (filters, _) = Recorder::new(0, 0);
    let p = new_parser(disfiltered_amber(5, 6), ParserOptions::default()).with_disambiguator(filters);
    let e = check_error_with(p, "x");
    assert_eq!(e.to_string(), "user function `disfilter' returns invalid value");
}

#[test]
fn test_disfilter_against_unset_prio_is_unhandled() {
    let mut t = disfiltered_amber(1, 2);
    t.annotation[21] = -1;
    let (pos, _) = ambiguity(t, "x");
    assert_eq!(pos, 1);
}

#[test]
fn test_confilter() {
    // the default filter answers with the annotation number itself
    check_rules(annotated_amber(-1), "xxx", &[10, 2, 7, 9, 8]);
    check_rules(annotated_amber(-2), "xxx", &[10, 2, 7, 8, 9]);
    assert_eq!(
        check_error(annotated_amber(-5), "xxx"),
        ParseError::CallbackContract {
            callback: "confilter",
            value: 5
        }
    );

    for (answer, expected) in [(1, vec![10, 2, 7, 9, 8]), (2, vec![10, 2, 7, 8, 9])] {
        let (filters, calls) = Recorder::new(0, answer);
        let mut p =
            new_parser(annotated_amber(-3), ParserOptions::default()).with_disambiguator(filters);
        assert_eq!(derive(&mut p, "xxx").unwrap(), expected);
        let calls = calls.lock().unwrap();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|c| *c == ("confilter", 3, 0)));
    }
}

#[test]
fn test_cyclic_annotation_is_refused() {
    let (pos, diagnostic) = ambiguity(unit_cycle(2, 1), "a");
    assert_eq!(pos, 1);
    assert!(diagnostic.contains("Annotation for ``S'' allows cyclic derivation."));

    check_rules(unit_cycle(1, 2), "a", &[3, 2]);
}

#[test]
fn test_cyclic_disfilter_is_refused() {
    let (pos, diagnostic) = ambiguity(unit_cycle_disfiltered(2, 1), "a");
    assert_eq!(pos, 1);
    assert!(diagnostic.contains("Annotation for ``S'' allows cyclic derivation."));

    check_rules(unit_cycle_disfiltered(1, 2), "a", &[3, 2]);
}

#[test]
fn test_without_cycle_check() {
    let options = ParserOptions {
        dynamic_cycle_check: false,
        ..ParserOptions::default()
    };
    let mut p = new_parser(prioritized_amber(), options.clone());
    assert_eq!(derive(&mut p, "x").unwrap(), vec![10, 1, 4, 6]);
    assert_eq!(derive(&mut p, "xx").unwrap(), vec![10, 2, 7, 8, 8]);
    let mut p = new_parser(unit_cycle(1, 2), options.clone());
    assert_eq!(derive(&mut p, "a").unwrap(), vec![3, 2]);

    // the unchecked overwrite leaves a cycle in the forest, so the
    // derivation never ends
    let mut p = new_parser(unit_cycle(2, 1), options);
    p.parse(&mut CharLexer::new("a")).unwrap();
    let rules = p
        .derivation()
        .unwrap()
        .take(50)
        .collect::<anyhow::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(rules.len(), 50);
    assert_eq!(rules[0], 3);
}

#[test]
fn test_left_recursion() {
    check_rules(left_recursive(), "n", &[3, 2]);
    check_rules(left_recursive(), "n+n", &[3, 1, 2]);
    check_rules(left_recursive(), "n+n+n", &[3, 1, 1, 2]);
    assert_eq!(syntax_error_at(left_recursive(), "n+"), 3);
    assert_eq!(syntax_error_at(left_recursive(), "+n"), 1);
    assert_eq!(syntax_error_at(left_recursive(), "nn"), 2);
}

#[test]
fn test_empty_rule() {
    check_rules(nullable(), "b", &[4, 1, 2]);
    check_rules(nullable(), "ab", &[4, 1, 3]);
    assert_eq!(syntax_error_at(nullable(), "a"), 2);
    assert_eq!(syntax_error_at(nullable(), "bb"), 2);
    assert_eq!(syntax_error_at(nullable(), ""), 1);
}

#[test]
fn test_long_input_grows_linearly() {
    let n = 2000;
    let input = sum(n);
    let mut p = new_parser(left_recursive(), ParserOptions::default());
    let rules = derive(&mut p, &input).unwrap();
    assert_eq!(rules.len(), n + 1);
    assert_eq!(rules[0], 3);
    assert_eq!(rules[n], 2);
    assert!(rules[1..n].iter().all(|&r| r == 1));

    let stats = p.stats();
    assert!(stats.items < 4 * input.len(), "{} items", stats.items);
    // every character, EOF, and EOF again for the final shift
    let summary = format!("parse done: {} lexvals", input.len() + 2);
    assert!(p.logger.get_buffer().contains(&summary));
}

#[test]
fn test_item_cap_reports_out_of_memory() {
    let limits = ParserLimits {
        item_increment: 32,
        max_items: 64,
        ..ParserLimits::default()
    };
    let grammar = Arc::new(Grammar::new(left_recursive()).unwrap());
    let p = Parser::new(grammar, ParserOptions::default(), limits)
        .unwrap()
        .with_logger(Logger::new(0, 0));
    let e = check_error_with(p, &sum(200));
    assert_eq!(e, ParseError::OutOfMemory);
    assert_eq!(e.to_string(), "running out of memory");
}

#[test]
fn test_amber_terms() {
    assert_eq!(
        amber_term(prioritized_amber(), "x").unwrap(),
        "example1(\n   b(\n      1\n   )\n)\n"
    );
    assert_eq!(
        amber_term(annotated_amber(1), "x xx").unwrap(),
        "example2(\n   pair(\n      double(\n         1,\n         3\n      ),\n      single(\n         4\n      )\n   )\n)\n"
    );
    assert!(amber_term(amber_tables(), "x").is_err());
}

#[test]
fn test_cli_output() {
    let json = serde_json::to_string(&prioritized_amber()).unwrap();
    let out = run_cli(&json, "x", Logger::new(0, 0)).unwrap();
    assert!(out.starts_with("derivation: 10 1 4 6\nYYSTART (rule 10)\n  Root (rule 1)\n"));
    assert!(out.contains("'x' Some('x') @1\n"));

    let e = run_cli(include_str!("../data/amber.json"), "xx", Logger::new(0, 0)).unwrap_err();
    assert_eq!(exit_code(&e), 1);
    assert!(e.to_string().contains("GRAMMAR DEBUG INFORMATION"));

    let e = run_cli("{\"grammar\": []}", "x", Logger::new(0, 0)).unwrap_err();
    assert_eq!(exit_code(&e), 1);
}
