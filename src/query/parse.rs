//! Recursive-descent parser for the text filter syntax.

use crate::error::{NearlineError, Result};
use crate::store::MetadataValue;

use super::filter::{CompareOp, MetadataFilter, MAX_FILTER_DEPTH};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Exists,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(CompareOp),
}

/// A token and the byte offset it starts at.
type Spanned = (Token, usize);

fn error(pos: usize, msg: impl AsRef<str>) -> NearlineError {
    NearlineError::invalid_query(format!(
        "malformed filter at position {}: {}",
        pos,
        msg.as_ref()
    ))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Comma,
                };
                tokens.push((token, pos));
            }
            '=' => {
                chars.next();
                // Accept both `=` and `==`
                if chars.peek().is_some_and(|&(_, n)| n == '=') {
                    chars.next();
                }
                tokens.push((Token::Op(CompareOp::Eq), pos));
            }
            '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.peek().is_some_and(|&(_, n)| n == '=');
                if followed_by_eq {
                    chars.next();
                }
                let op = match (c, followed_by_eq) {
                    ('!', true) => CompareOp::Ne,
                    ('!', false) => return Err(error(pos, "expected '!='")),
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    ('>', true) => CompareOp::Ge,
                    _ => CompareOp::Gt,
                };
                tokens.push((Token::Op(op), pos));
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, 'r')) => value.push('\r'),
                            Some((_, e @ ('\\' | '"' | '\''))) => value.push(e),
                            Some((epos, 'u')) => {
                                if !matches!(chars.next(), Some((_, '{'))) {
                                    return Err(error(epos, "expected '{' after '\\u'"));
                                }
                                let mut hex = String::new();
                                loop {
                                    match chars.next() {
                                        Some((_, '}')) => break,
                                        Some((_, h)) if h.is_ascii_hexdigit() && hex.len() < 6 => {
                                            hex.push(h)
                                        }
                                        _ => return Err(error(epos, "malformed '\\u{..}' escape")),
                                    }
                                }
                                let decoded = u32::from_str_radix(&hex, 16)
                                    .ok()
                                    .and_then(char::from_u32)
                                    .ok_or_else(|| error(epos, "invalid unicode escape"))?;
                                value.push(decoded);
                            }
                            Some((epos, other)) => {
                                return Err(error(epos, format!("unknown escape '\\{}'", other)))
                            }
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(error(pos, "unterminated string"));
                }
                tokens.push((Token::Str(value), pos));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let mut text = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    let sign_after_exp =
                        matches!(ch, '-' | '+') && (text.is_empty() || text.ends_with(['e', 'E']));
                    if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E') || sign_after_exp {
                        text.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((parse_number(&text, pos)?, pos));
            }
            c if is_ident_start(c) => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if is_ident_char(ch) {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "exists" => Token::Exists,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                tokens.push((token, pos));
            }
            other => return Err(error(pos, format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str, pos: usize) -> Result<Token> {
    let is_float = text.contains(['.', 'e', 'E']);
    if is_float {
        let value: f64 = text
            .parse()
            .map_err(|_| error(pos, format!("invalid number '{}'", text)))?;
        if !value.is_finite() {
            return Err(error(pos, format!("number out of range '{}'", text)));
        }
        Ok(Token::Float(value))
    } else {
        text.parse()
            .map(Token::Int)
            .map_err(|_| error(pos, format!("invalid integer '{}'", text)))
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, p)| *p)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        let at = self.offset();
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(_) => Err(error(at, format!("expected {}", what))),
            None => Err(error(at, format!("expected {}, found end of input", what))),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(error(
                self.offset(),
                format!("nesting exceeds {} levels", MAX_FILTER_DEPTH),
            ));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<MetadataFilter> {
        self.enter()?;
        let mut children = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            children.push(self.and_expr()?);
        }
        self.depth -= 1;
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MetadataFilter::Or(children)
        })
    }

    fn and_expr(&mut self) -> Result<MetadataFilter> {
        let mut children = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            children.push(self.unary()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MetadataFilter::And(children)
        })
    }

    fn unary(&mut self) -> Result<MetadataFilter> {
        let at = self.offset();
        match self.next() {
            Some(Token::Not) => {
                self.enter()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(MetadataFilter::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Exists) => {
                self.expect(Token::LParen, "'(' after exists")?;
                let key = self.key()?;
                self.expect(Token::RParen, "')'")?;
                Ok(MetadataFilter::Exists { key })
            }
            Some(Token::Ident(key)) => self.predicate(key),
            Some(_) => Err(error(at, "expected a predicate")),
            None => Err(error(at, "expected a predicate, found end of input")),
        }
    }

    fn key(&mut self) -> Result<String> {
        let at = self.offset();
        match self.next() {
            Some(Token::Ident(key)) => Ok(key),
            _ => Err(error(at, "expected a metadata key")),
        }
    }

    fn predicate(&mut self, key: String) -> Result<MetadataFilter> {
        let at = self.offset();
        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.literal()?;
                Ok(MetadataFilter::Compare { key, op, value })
            }
            Some(Token::In) => {
                self.expect(Token::LBracket, "'[' after IN")?;
                let mut values = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    values.push(self.literal()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.next();
                        values.push(self.literal()?);
                    }
                }
                self.expect(Token::RBracket, "']'")?;
                Ok(MetadataFilter::In { key, values })
            }
            _ => Err(error(at, format!("expected an operator after '{}'", key))),
        }
    }

    fn literal(&mut self) -> Result<MetadataValue> {
        let at = self.offset();
        match self.next() {
            Some(Token::Str(s)) => Ok(MetadataValue::String(s)),
            Some(Token::Int(i)) => Ok(MetadataValue::Int(i)),
            Some(Token::Float(x)) => Ok(MetadataValue::Float(x)),
            Some(Token::True) => Ok(MetadataValue::Bool(true)),
            Some(Token::False) => Ok(MetadataValue::Bool(false)),
            Some(Token::Null) => Ok(MetadataValue::Null),
            _ => Err(error(at, "expected a literal")),
        }
    }
}

/// Parses filter text into an (unvalidated) filter tree.
pub(crate) fn parse_filter(input: &str) -> Result<MetadataFilter> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(error(0, "filter is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    };
    let filter = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(error(parser.offset(), "unexpected trailing input"));
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_comparison() {
        let f = parse_filter("duration <= 30").unwrap();
        assert_eq!(f, MetadataFilter::compare("duration", CompareOp::Le, 30));
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        let f = parse_filter(r#"a = 1 OR b = 2 AND c = 3"#).unwrap();
        assert_eq!(
            f,
            MetadataFilter::Or(vec![
                MetadataFilter::eq("a", 1),
                MetadataFilter::And(vec![MetadataFilter::eq("b", 2), MetadataFilter::eq("c", 3)]),
            ])
        );
    }

    #[test]
    fn test_parentheses_and_not() {
        let f = parse_filter(r#"NOT (remote = true or exists(office))"#).unwrap();
        assert_eq!(
            f,
            MetadataFilter::Not(Box::new(MetadataFilter::Or(vec![
                MetadataFilter::eq("remote", true),
                MetadataFilter::exists("office"),
            ])))
        );
    }

    #[test]
    fn test_in_list_and_literals() {
        let f = parse_filter(r#"level in ['junior', "mid", 3, -1.5e0, null]"#).unwrap();
        assert_eq!(
            f,
            MetadataFilter::one_of(
                "level",
                vec![
                    "junior".into(),
                    "mid".into(),
                    MetadataValue::Int(3),
                    MetadataValue::Float(-1.5),
                    MetadataValue::Null,
                ]
            )
        );
    }

    #[test]
    fn test_unicode_escapes() {
        let f = parse_filter(r#"k = "a\u{1}b\u{e9}""#).unwrap();
        assert_eq!(f, MetadataFilter::eq("k", "a\u{1}bé"));

        for bad in [
            r#"k = "\u1""#,
            r#"k = "\u{}""#,
            r#"k = "\u{d800}""#,
            r#"k = "\u{1234567}""#,
        ] {
            assert!(parse_filter(bad).unwrap_err().is_invalid_query(), "{}", bad);
        }
    }

    #[test]
    fn test_control_characters_print_back_parseable() {
        let f = parse_filter("k = \"a\u{1}b\u{7f}\tc\"").unwrap();
        let printed = f.to_string();
        assert_eq!(printed, r#"k = "a\u{1}b\u{7f}\tc""#);
        assert_eq!(parse_filter(&printed).unwrap(), f);
    }

    #[test]
    fn test_filter_at_depth_limit_prints_back_parseable() {
        let input = format!(
            "a = 1 AND {}(b = 2 OR c = 3)",
            "NOT ".repeat(MAX_FILTER_DEPTH - 2)
        );
        let f = parse_filter(&input).unwrap();
        assert_eq!(parse_filter(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_string_escapes() {
        let f = parse_filter(r#"name = "say \"hi\"\n""#).unwrap();
        assert_eq!(f, MetadataFilter::eq("name", "say \"hi\"\n"));
    }

    #[test]
    fn test_dotted_keys_and_double_equals() {
        let f = parse_filter("job.level == 2").unwrap();
        assert_eq!(f, MetadataFilter::eq("job.level", 2));
    }

    #[test]
    fn test_malformed_inputs() {
        for input in [
            "",
            "   ",
            "duration <=",
            "duration 30",
            "= 3",
            "a = 1 AND",
            "(a = 1",
            "a = 1)",
            "a = \"open",
            "a ! 1",
            "a = 1 b = 2",
            "exists(1)",
            "a IN [1, ]",
            "a = 99999999999999999999",
            "a = #",
        ] {
            let err = parse_filter(input).unwrap_err();
            assert!(err.is_invalid_query(), "input {:?} gave {:?}", input, err);
        }
    }

    #[test]
    fn test_depth_limit() {
        let input = format!("{}a = 1{}", "(".repeat(64), ")".repeat(64));
        assert!(parse_filter(&input).unwrap_err().is_invalid_query());

        let input = format!("{}a = 1", "NOT ".repeat(64));
        assert!(parse_filter(&input).unwrap_err().is_invalid_query());
    }
}
