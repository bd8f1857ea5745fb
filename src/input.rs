use kestrel::lang::token::{Token, TokenKind};
use kestrel::lang::tokenize::tokenize_str;

/// Change in block depth caused by one line's tokens
fn line_depth(line: &[&Token]) -> i32 {
    let first = match line.first() {
        Some(t) => t,
        None => return 0,
    };
    let second = line.get(1);
    let ends_with_then = line.last().map_or(false, |t| t.is("then"));

    if first.is("shared") {
        // shared function / constructor open a block, shared property does not
        return match second {
            Some(t) if t.is("function") || t.is("constructor") => 1,
            _ => 0,
        };
    }

    match first.text.as_str() {
        _ if first.kind != TokenKind::Keyword => 0,
        "class" | "behaviour" | "while" | "for" | "repeat" | "function" | "constructor" => 1,
        "if" if ends_with_then => 1,
        "end" | "until" => -1,
        _ => 0,
    }
}

/// Number of blocks `input` leaves open
pub fn open_blocks(input: &str) -> i32 {
    let tokens = tokenize_str(input, "<input>");
    let mut depth = 0;
    let mut line: Vec<&Token> = Vec::new();

    for token in &tokens {
        match token.kind {
            TokenKind::Eol | TokenKind::Eof => {
                depth += line_depth(&line);
                line.clear();
            }
            _ => line.push(token),
        }
    }

    depth
}

/// Fixup input so the parser is happy
///
/// Joins lines continued with a trailing `\` and makes sure the input ends with a newline.
pub fn fixup_input(input: &str) -> String {
    let mut ret = input.replace("\\\n", " ");
    if !ret.ends_with('\n') {
        ret.push('\n');
    }

    ret
}

#[test]
fn test_open_blocks() {
    let data = vec![
        ("x = 1", 0),
        ("class A", 1),
        ("class A\nend", 0),
        ("function f(a)\n    if a then\n", 2),
        ("if a then b = 1", 0),
        ("if a then\nelse if b then\n", 1),
        ("native function draw(x)", 0),
        ("class A\n    shared property n = 1\n    shared function f()\n", 2),
        ("repeat\n    x = x + 1\nuntil x > 3", 0),
        ("print(\"class\")", 0),
        ("// while\n/* for", 0),
        ("while x < 3 do\n    x = x + 1\nend\nend", -1),
    ];

    for (input, expected) in data {
        assert_eq!(open_blocks(input), expected, "{:?}", input);
    }
}

#[test]
fn test_fixup_input() {
    assert_eq!(fixup_input("asdf \\\nme"), "asdf  me\n");
    assert_eq!(fixup_input("asdf \\ \nme"), "asdf \\ \nme\n");
    assert_eq!(fixup_input("x = 1\n"), "x = 1\n");
    assert_eq!(fixup_input("meline"), "meline\n");
}
