//! Source generators shared by the pipeline benchmarks.

use std::fmt::Write;

/// `count` independent folds over `nat`, each called from a binding.
pub fn nat_folds_source(count: usize) -> String {
    let mut source = String::new();
    for i in 0..count {
        let _ = writeln!(
            source,
            "fold double_{i} : nat -> nat {{\n  | Zero => Zero\n  | Succ(@p) => Succ(Succ(p))\n}}\nlet use_{i} = double_{i}(Succ(Succ(Zero)))"
        );
    }
    source
}

/// `count` copies of a pair of mutually linked JSON encoders.
pub fn json_encoders_source(count: usize) -> String {
    let mut source = String::from("type Json = Null | Num(int) | Array(List<Json>)\n");
    for i in 0..count {
        let _ = writeln!(
            source,
            "fold encode_value_{i} : Json -> string {{\n  | Null => \"null\"\n  | Num(_) => \"n\"\n  | Array(encode_array_{i}(@items)) => \"[\" ++ items ++ \"]\"\n}}\n\
             fold encode_array_{i} : List<Json> -> string {{\n  | Nil => \"\"\n  | Cons(encode_value_{i}(@v), Nil) => v\n  | Cons(encode_value_{i}(@v), @rest) => v ++ \",\" ++ rest\n}}"
        );
    }
    source
}

/// `count` stream unfolds plus accumulator folds that consume lists.
pub fn stream_source(count: usize) -> String {
    let mut source = String::from("codata Stream<T> = { head: T, tail: Stream<T> }\n");
    for i in 0..count {
        let _ = writeln!(
            source,
            "unfold from_{i} : int -> Stream<int> {{ n => head = n, @tail = n + {step} }}\n\
             fold sum_{i} : (List<int>, int) -> int {{\n  | (Nil, acc) => acc\n  | (Cons(x, @rest), acc) => rest(acc + x)\n}}",
            step = i + 1
        );
    }
    source
}

/// A program whose `main` observes the `depth`-th element of a stream.
pub fn deep_stream_program(depth: usize) -> String {
    let mut observe = String::from("naturals(0)");
    for _ in 0..depth {
        observe.push_str(".tail");
    }
    format!(
        "codata Stream<T> = {{ head: T, tail: Stream<T> }}\n\
         unfold naturals : int -> Stream<int> {{ n => head = n, @tail = n + 1 }}\n\
         let main = {observe}.head\n"
    )
}
