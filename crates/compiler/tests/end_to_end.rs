//! Source-to-value integration tests, one per scenario in the language
//! surface's worked examples: arithmetic, loops, recursion, structs,
//! arrays, and closures/upvalues.

use matiriac::config::RunConfig;
use matiria_runtime::Value;

fn run_ok(source: &str) -> Value {
    let config = RunConfig::new("test.matiria");
    matiriac::run(source, &config).unwrap_or_else(|e| panic!("expected success, got: {}", e))
}

#[test]
fn arithmetic_precedence() {
    let result = run_ok("fn main() -> Int { Int x := 3 + 4 * 2; return x; }");
    assert_eq!(result, Value::Int(11));
}

#[test]
fn while_loop_accumulates() {
    let source = "fn main() -> Int { \
        Int s := 0; Int i := 0; \
        while i < 10: { s := s + i; i := i + 1; } \
        return s; \
    }";
    assert_eq!(run_ok(source), Value::Int(45));
}

#[test]
fn recursive_fibonacci() {
    let source = "\
        fn fib(Int n) -> Int { if n < 2: return n; return fib(n-1) + fib(n-2); } \
        fn main() -> Int { return fib(10); }";
    assert_eq!(run_ok(source), Value::Int(55));
}

#[test]
fn struct_field_assignment_and_access() {
    let source = "\
        type Pair := { Int a, Int b } \
        fn main() -> Int { Pair p; p.a := 2; p.b := 40; return p.a + p.b; }";
    assert_eq!(run_ok(source), Value::Int(42));
}

#[test]
fn array_indexing() {
    let source = "fn main() -> Int { [Int] xs := [10, 20, 30]; return xs[1]; }";
    assert_eq!(run_ok(source), Value::Int(20));
}

#[test]
fn closure_captures_an_upvalue() {
    let source = "\
        fn makeAdder(Int x) -> (Int) -> Int { fn add(Int y) -> Int = x + y; return add; } \
        fn main() -> Int { (Int) -> Int a := makeAdder(3); return a(4); }";
    assert_eq!(run_ok(source), Value::Int(7));
}

#[test]
fn division_by_zero_is_a_runtime_error_with_no_panic() {
    let config = RunConfig::new("test.matiria");
    let err = matiriac::run("fn main() -> Int { return 1 / 0; }", &config).unwrap_err();
    assert!(matches!(
        err,
        matiriac::RunError::Runtime(matiria_runtime::RuntimeError::DivisionByZero)
    ));
}

#[test]
fn undeclared_name_is_a_semantic_error_and_never_executes() {
    assert!(matiriac::check("fn main() -> Int { return missing; }").is_err());
}

#[test]
fn unexpected_token_is_a_parse_error() {
    let config = RunConfig::new("test.matiria");
    let err = matiriac::run("fn main( -> Int { return 1; }", &config).unwrap_err();
    assert!(matches!(err, matiriac::RunError::Parse(_)));
}
