use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use entire::{
    api::{GrammarTables, ParserLimits, ParserOptions},
    earley::{CharLexer, Derivation, Disambiguator, LexvalStream},
    runtime::{ControlArena, HeapPiece, HeapRef, RuntimeError, TermPrinter, Word},
    walker, Grammar, Logger, ParseError, Parser,
};
use lazy_static::lazy_static;

lazy_static! {
    static ref AMBER: GrammarTables = serde_json::from_str(include_str!("../data/amber.json"))
        .expect("Invalid JSON in data/amber.json");
}

/// The ambiguous demo grammar, without any annotations:
///
/// ```text
/// Root: Example1 | Example2;
/// Example1: A | B;  A: 'x';  B: 'x';
/// Example2: X X;    X: 'x' | 'x' 'x';
/// ```
pub fn amber_tables() -> GrammarTables {
    AMBER.clone()
}

/// `%prio 1` on `Example1: A`, `%prio 2` on `Example1: B`.
pub fn prioritized_amber() -> GrammarTables {
    let mut t = amber_tables();
    t.annotation[17] = 1;
    t.annotation[21] = 2;
    t
}

/// Prioritized, with `annotation` on the second `X` of `Example2`
/// (1 is `%short`, 2 is `%long`, -n is `%n`).
pub fn annotated_amber(annotation: i32) -> GrammarTables {
    let mut t = prioritized_amber();
    t.annotation[32] = annotation;
    t
}

/// `%disfilter n1` on `Example1: A`, `%disfilter n2` on `Example1: B`.
pub fn disfiltered_amber(n1: i32, n2: i32) -> GrammarTables {
    let mut t = amber_tables();
    t.annotation[17] = -n1 - 1;
    t.annotation[21] = -n2 - 1;
    t
}

pub fn new_parser(tables: GrammarTables, options: ParserOptions) -> Parser {
    let grammar = Grammar::new(tables).expect("invalid grammar tables");
    Parser::new(Arc::new(grammar), options, ParserLimits::default())
        .expect("cannot allocate parser")
        .with_logger(Logger::new(2, 0))
}

/// Parse `input` and return the rule numbers of the left derivation.
pub fn derive(parser: &mut Parser, input: &str) -> Result<Vec<i32>> {
    parser.parse(&mut CharLexer::new(input))?;
    parser.derivation()?.collect()
}

pub fn check_rules(tables: GrammarTables, input: &str, expected: &[i32]) -> Parser {
    println!("\nChecking {:?} against {:?}", input, expected);
    let mut parser = new_parser(tables, ParserOptions::default());
    match derive(&mut parser, input) {
        Ok(rules) => assert_eq!(rules, expected, "derivation of {:?}", input),
        Err(e) => panic!("parse of {:?} failed: {}", input, e),
    }
    parser
}

/// Parse `input`, which must fail, and return the reason.
pub fn check_error(tables: GrammarTables, input: &str) -> ParseError {
    check_error_with(new_parser(tables, ParserOptions::default()), input)
}

pub fn check_error_with(mut parser: Parser, input: &str) -> ParseError {
    match derive(&mut parser, input) {
        Ok(rules) => panic!("parse of {:?} succeeded with {:?}", input, rules),
        Err(e) => match e.downcast::<ParseError>() {
            Ok(e) => e,
            Err(e) => panic!("parse of {:?} failed with foreign error: {}", input, e),
        },
    }
}

/// Process exit status for an error returned by `run_cli`.
pub fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<ParseError>() {
        Some(e) => e.exit_code(),
        None => 1,
    }
}

/// What the command line tool prints for one input: the rule numbers of
/// the derivation followed by the tree.
pub fn run_cli(tables_json: &str, input: &str, logger: Logger) -> Result<String> {
    let grammar = Arc::new(Grammar::from_json(tables_json)?);
    let mut parser = Parser::new(grammar, ParserOptions::default(), ParserLimits::default())?
        .with_logger(logger);
    let mut lexvals = parser.parse(&mut CharLexer::new(input))?;
    let mut derivation = parser.derivation()?;
    let rules = derivation
        .by_ref()
        .map(|r| r.map(|r| r.to_string()))
        .collect::<Result<Vec<_>>>()?;
    derivation.reset();
    let tree = walker::walk(parser.grammar(), &mut derivation, &mut lexvals)?;
    Ok(format!(
        "derivation: {}\n{}",
        rules.join(" "),
        tree.render(parser.grammar())
    ))
}

pub type CallLog = Arc<Mutex<Vec<(&'static str, i32, i32)>>>;

/// Filters that answer with fixed values and record every call.
#[derive(Debug, Default)]
pub struct Recorder {
    pub disfilter_answer: i32,
    pub confilter_answer: i32,
    pub calls: CallLog,
}

impl Recorder {
    pub fn new(disfilter_answer: i32, confilter_answer: i32) -> (Box<Self>, CallLog) {
        let r = Recorder {
            disfilter_answer,
            confilter_answer,
            calls: CallLog::default(),
        };
        let calls = r.calls.clone();
        (Box::new(r), calls)
    }
}

impl Disambiguator for Recorder {
    fn disfilter(&mut self, n1: i32, n2: i32, p1: usize, p2: usize) -> i32 {
        assert_ne!(p1, p2);
        self.calls.lock().unwrap().push(("disfilter", n1, n2));
        self.disfilter_answer
    }

    fn confilter(&mut self, n: i32, p1: usize, p2: usize) -> i32 {
        assert_ne!(p1, p2);
        self.calls.lock().unwrap().push(("confilter", n, 0));
        self.confilter_answer
    }
}

const POS: Word = 0;

/// Terms of the amber grammar, stored as `[functor, arity, args...]` in a
/// heap. Arguments are term numbers, except for `POS` leaves which carry
/// the token position.
pub struct AmberTerms {
    heap: HeapPiece,
    terms: Vec<HeapRef>,
}

fn functor_name(functor: Word) -> &'static str {
    match functor {
        1 => "example1",
        2 => "example2",
        3 => "a",
        4 => "b",
        7 => "pair",
        8 => "single",
        9 => "double",
        _ => "?",
    }
}

impl AmberTerms {
    pub fn new() -> Result<Self> {
        Ok(AmberTerms {
            heap: HeapPiece::new()?,
            terms: vec![],
        })
    }

    fn make(&mut self, functor: Word, args: &[Word]) -> Result<Word> {
        let r = self.heap.alloc(args.len() + 2)?;
        let words = self.heap.get_mut(r);
        words[0] = functor;
        words[1] = args.len() as Word;
        words[2..].copy_from_slice(args);
        self.terms.push(r);
        Ok(self.terms.len() as Word - 1)
    }

    pub fn print(&self, term: Word) -> String {
        let mut p = TermPrinter::new(String::new());
        self.print_term(&mut p, term)
            .and_then(|_| p.end_print())
            .expect("write to String");
        p.into_inner()
    }

    fn print_term(&self, p: &mut TermPrinter<String>, term: Word) -> std::fmt::Result {
        let words = self.heap.get(self.terms[term as usize]);
        if words[0] == POS {
            return p.pos(words[2]);
        }
        p.term(functor_name(words[0]))?;
        let args = &words[2..];
        if args.is_empty() {
            return p.no_args();
        }
        for (i, &a) in args.iter().enumerate() {
            if i == 0 {
                p.first_arg()?;
            } else {
                p.next_arg()?;
            }
            self.print_term(p, a)?;
        }
        p.end_args()
    }
}

/// Hand-written walker for the amber grammar: one function per
/// nonterminal, each taking its rule number from the derivation and its
/// token positions from the semantic value stream.
pub struct AmberWalker<'a> {
    derivation: Derivation<'a>,
    lexvals: &'a mut LexvalStream<Option<char>>,
    pub terms: AmberTerms,
}

impl<'a> AmberWalker<'a> {
    pub fn new(
        derivation: Derivation<'a>,
        lexvals: &'a mut LexvalStream<Option<char>>,
    ) -> Result<Self> {
        Ok(AmberWalker {
            derivation,
            lexvals,
            terms: AmberTerms::new()?,
        })
    }

    fn rule(&mut self) -> Result<i32> {
        self.derivation
            .next_rule()?
            .ok_or_else(|| anyhow!(RuntimeError::new(RuntimeError::UNDEFINED_VALUE, "amber.g", 1)))
    }

    fn token(&mut self) -> Result<Word> {
        let pos = match self.lexvals.get_lexval() {
            Some(l) => l.pos,
            None => bail!(RuntimeError::new(RuntimeError::UNDEFINED_VALUE, "amber.g", 1)),
        };
        self.terms.make(POS, &[pos])
    }

    fn no_rule(line: u32) -> anyhow::Error {
        RuntimeError::new(RuntimeError::NO_RULE_APPLICABLE, "amber.g", line).into()
    }

    /// `YYSTART: Root <EOF>`
    pub fn start(&mut self, control: &mut ControlArena) -> Result<Word> {
        match self.rule()? {
            10 => {
                let t = self.root(control)?;
                self.token()?;
                Ok(t)
            }
            _ => Err(Self::no_rule(1)),
        }
    }

    fn root(&mut self, control: &mut ControlArena) -> Result<Word> {
        let mut frame = control.begin_choice()?;
        let locals = frame.alloc(2)?;
        let rule = self.rule()?;
        frame.get_mut(locals)[0] = rule as Word;
        let sub = match rule {
            1 => self.example1()?,
            2 => self.example2(&mut frame)?,
            _ => return Err(Self::no_rule(3)),
        };
        frame.get_mut(locals)[1] = sub;
        let [functor, arg] = [frame.get(locals)[0], frame.get(locals)[1]];
        frame.end_choice();
        self.terms.make(functor, &[arg])
    }

    fn example1(&mut self) -> Result<Word> {
        let rule = self.rule()?;
        let pos = match (rule, self.rule()?) {
            (3, 5) | (4, 6) => self.token()?,
            (3 | 4, _) => return Err(Self::no_rule(11)),
            _ => return Err(Self::no_rule(9)),
        };
        self.terms.make(rule as Word, &[pos])
    }

    fn example2(&mut self, control: &mut ControlArena) -> Result<Word> {
        match self.rule()? {
            7 => {
                let first = self.x(control)?;
                let second = self.x(control)?;
                self.terms.make(7, &[first, second])
            }
            _ => Err(Self::no_rule(24)),
        }
    }

    fn x(&mut self, control: &mut ControlArena) -> Result<Word> {
        let mut frame = control.begin_choice()?;
        let rule = self.rule()?;
        let n = match rule {
            8 => 1,
            9 => 2,
            _ => return Err(Self::no_rule(28)),
        };
        let locals = frame.alloc(n)?;
        for k in 0..n {
            let t = self.token()?;
            frame.get_mut(locals)[k] = t;
        }
        let args = frame.get(locals).to_vec();
        frame.end_choice();
        self.terms.make(rule as Word, &args)
    }
}

/// Parse `input` with `tables` and print the amber term it denotes.
pub fn amber_term(tables: GrammarTables, input: &str) -> Result<String> {
    let mut parser = new_parser(tables, ParserOptions::default());
    let mut lexvals = parser.parse(&mut CharLexer::new(input))?;
    let mut control = ControlArena::new()?;
    let mut walker = AmberWalker::new(parser.derivation()?, &mut lexvals)?;
    let t = walker.start(&mut control)?;
    Ok(walker.terms.print(t))
}
