use luap::scanner::{Scanner, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    Scanner::new(source).map(|token| token.kind).collect()
}

fn lexemes(source: &str) -> Vec<String> {
    Scanner::new(source)
        .map(|token| token.lexeme.to_string())
        .collect()
}

#[test]
fn test_empty_source() {
    assert!(kinds("").is_empty());
    assert!(kinds("   \t\n  ").is_empty());
}

#[test]
fn test_single_character_tokens() {
    assert_eq!(
        kinds("( ) { } [ ] , ; : + - * / % #"),
        vec![
            TokenKind::LeftParen,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::RightBrace,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Comma,
            TokenKind::Semicolon,
            TokenKind::Colon,
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::Hash,
        ]
    );
}

#[test]
fn test_maximal_munch_operators() {
    assert_eq!(
        kinds("== = ~= ~ <= < >= >"),
        vec![
            TokenKind::EqualEqual,
            TokenKind::Equal,
            TokenKind::TildeEqual,
            TokenKind::Tilde,
            TokenKind::LessEqual,
            TokenKind::Less,
            TokenKind::GreaterEqual,
            TokenKind::Greater,
        ]
    );
}

#[test]
fn test_maximal_munch_dots() {
    assert_eq!(kinds(".."), vec![TokenKind::DotDot]);
    assert_eq!(kinds("..."), vec![TokenKind::DotDotDot]);
    assert_eq!(kinds("...."), vec![TokenKind::DotDotDot, TokenKind::Dot]);
}

#[test]
fn test_number_followed_by_dot() {
    assert_eq!(
        kinds("123.abc"),
        vec![TokenKind::Number, TokenKind::Dot, TokenKind::Identifier]
    );
    assert_eq!(lexemes("123.abc"), vec!["123", ".", "abc"]);
}

#[test]
fn test_number_followed_by_range() {
    assert_eq!(
        kinds("1..10"),
        vec![TokenKind::Number, TokenKind::DotDot, TokenKind::Number]
    );
    assert_eq!(lexemes("1..10"), vec!["1", "..", "10"]);
}

#[test]
fn test_number_forms() {
    assert_eq!(kinds("0 42 3.14 1e5 2.5e-3"), vec![TokenKind::Number; 5]);
    assert_eq!(lexemes("3.14"), vec!["3.14"]);
    assert_eq!(lexemes("2.5e-3"), vec!["2.5e-3"]);
}

#[test]
fn test_keywords() {
    assert_eq!(
        kinds("and break continue do else elseif end false for function"),
        vec![
            TokenKind::And,
            TokenKind::Break,
            TokenKind::Continue,
            TokenKind::Do,
            TokenKind::Else,
            TokenKind::Elseif,
            TokenKind::End,
            TokenKind::False,
            TokenKind::For,
            TokenKind::Function,
        ]
    );
    assert_eq!(
        kinds("class extends new super self private trait implements"),
        vec![
            TokenKind::Class,
            TokenKind::Extends,
            TokenKind::New,
            TokenKind::Super,
            TokenKind::SelfKw,
            TokenKind::Private,
            TokenKind::Trait,
            TokenKind::Implements,
        ]
    );
}

#[test]
fn test_keyword_prefixes_are_identifiers() {
    assert_eq!(
        kinds("classes iffy ender localize"),
        vec![TokenKind::Identifier; 4]
    );
}

#[test]
fn test_keyword_case_sensitivity() {
    assert_eq!(kinds("IF If iF"), vec![TokenKind::Identifier; 3]);
}

#[test]
fn test_strings() {
    assert_eq!(kinds(r#""hello""#), vec![TokenKind::String]);
    assert_eq!(kinds("'hello'"), vec![TokenKind::String]);
    assert_eq!(kinds("[[long string]]"), vec![TokenKind::String]);
    assert_eq!(lexemes(r#""a b""#), vec!["\"a b\""]);
}

#[test]
fn test_unterminated_string() {
    let tokens: Vec<_> = Scanner::new("\"oops").collect();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Error);
    assert_eq!(tokens[0].lexeme, "Unterminated string.");
}

#[test]
fn test_unterminated_long_string() {
    let tokens: Vec<_> = Scanner::new("[[oops").collect();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Error);
    assert_eq!(tokens[0].lexeme, "Unterminated long string.");
}

#[test]
fn test_comments_are_skipped() {
    assert_eq!(kinds("-- a line comment\n42"), vec![TokenKind::Number]);
    assert_eq!(kinds("--[[ block\ncomment ]] 42"), vec![TokenKind::Number]);
    assert_eq!(kinds("-- only a comment"), vec![]);
    // A single dash is still the minus operator.
    assert_eq!(kinds("1 - 2"), vec![TokenKind::Number, TokenKind::Minus, TokenKind::Number]);
}

#[test]
fn test_line_and_column_tracking() {
    let tokens: Vec<_> = Scanner::new("local x\nlocal yy = 1").collect();
    assert_eq!(tokens[0].line, 1);
    assert_eq!(tokens[0].column, 1);
    assert_eq!(tokens[1].line, 1);
    assert_eq!(tokens[1].column, 7);
    assert_eq!(tokens[2].line, 2);
    assert_eq!(tokens[2].column, 1);
    assert_eq!(tokens[3].line, 2);
    assert_eq!(tokens[3].column, 7);
}

#[test]
fn test_newline_in_string_advances_line() {
    let tokens: Vec<_> = Scanner::new("\"a\nb\" x").collect();
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[1].kind, TokenKind::Identifier);
    assert_eq!(tokens[1].line, 2);
}

#[test]
fn test_line_after_block_comment() {
    let tokens: Vec<_> = Scanner::new("--[[\n\n]]\nx").collect();
    assert_eq!(tokens[0].kind, TokenKind::Identifier);
    assert_eq!(tokens[0].line, 4);
}

#[test]
fn test_deterministic_rescanning() {
    let source = "local t = {1, 2.5, \"s\"} -- c\nfor i=1,10 do print(i) end";
    let first: Vec<_> = Scanner::new(source)
        .map(|t| (t.kind, t.lexeme.to_string(), t.line, t.column))
        .collect();
    let second: Vec<_> = Scanner::new(source)
        .map(|t| (t.kind, t.lexeme.to_string(), t.line, t.column))
        .collect();
    assert_eq!(first, second);
}
