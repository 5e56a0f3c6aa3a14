//! Integration tests over the full pipeline's output bytes: a source string
//! in, a complete binary module out.

use expect_test::expect;
use indoc::indoc;
use pretty_assertions::assert_eq;

use stackc_compiler::compile;

fn decode_uleb128(bytes: &[u8]) -> (u64, usize) {
    let mut result: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return (result, i + 1);
        }
        shift += 7;
    }
    panic!("truncated uleb128");
}

fn code_section(bytes: &[u8]) -> &[u8] {
    let mut pos = 8;
    loop {
        let id = bytes[pos];
        let (len, consumed) = decode_uleb128(&bytes[pos + 1..]);
        let start = pos + 1 + consumed;
        let end = start + len as usize;
        if id == 10 {
            return &bytes[start..end];
        }
        pos = end;
    }
}

#[test]
fn compiling_a_byte_swap_style_program_succeeds() {
    let source = indoc! {"
        memory 1
        buf: ptr i32 = 0
        swap: fn (i: i32, j: i32) void {
            tmp: i32 = buf[i]
            buf[i] = buf[j]
            buf[j] = tmp
        }
        export swap
    "};
    let bytes = compile(source).unwrap();
    assert_eq!(&bytes[0..4], &[0x00, 0x61, 0x73, 0x6D]);
}

#[test]
fn a_fibonacci_style_loop_compiles_to_a_block_wrapped_loop() {
    let source = indoc! {"
        fib: fn (n: i32) i32 {
            a: i32 = 0
            b: i32 = 1
            i: i32 = 0
            loop {
                if i >= n { break }
                next: i32 = a + b
                a = b
                b = next
                i = i + 1
            }
            a
        }
        export fib
    "};
    let bytes = compile(source).unwrap();
    let code = code_section(&bytes);
    // block(0x40), loop(0x40) — the outer-block/inner-loop pair every
    // `Loop` lowers to, each typed void since fib's loop itself yields
    // nothing (its value comes from the trailing `a` after the loop).
    assert!(code.windows(2).any(|w| w == [0x02, 0x40]));
    assert!(code.windows(2).any(|w| w == [0x03, 0x40]));
}

#[test]
fn recursive_call_lowers_to_a_direct_call_opcode() {
    let source = indoc! {"
        factorial: fn (n: i32) i32 {
            if n < 2 { 1 } else { n * factorial(n - 1) }
        }
        export factorial
    "};
    let bytes = compile(source).unwrap();
    let code = code_section(&bytes);
    assert!(code.contains(&0x10)); // call
}

#[test]
fn a_void_exported_function_with_no_params_gets_a_start_section() {
    let bytes = compile("main: fn () void { }\n");
    let expected = expect![[r#"
        [0, 97, 115, 109]
    "#]];
    expected.assert_eq(&format!("{:?}", bytes[0..4].to_vec()));
}
