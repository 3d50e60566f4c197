//! Tokenizer for rule strings

use super::RuleSyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `critical`, `warning`, `normal`, `historical`, `AND`, `OR` or a unit
    Word(String),
    Number(f64),
    Colon,
    /// One of `> >= < <= == !=`
    Comparator(&'static str),
    /// One of `* / + -`
    Arith(char),
}

/// Split a rule into tokens, ignoring whitespace
pub fn tokenize(raw: &str) -> Result<Vec<Token>, RuleSyntaxError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        match c {
            c if c.is_whitespace() => pos += 1,
            ':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            '>' | '<' | '=' | '!' => {
                let op = match (c, next) {
                    ('>', Some('=')) => ">=",
                    ('<', Some('=')) => "<=",
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('>', _) => ">",
                    ('<', _) => "<",
                    _ => {
                        return Err(RuleSyntaxError::new(
                            raw,
                            format!("unexpected character {c:?} at {pos}"),
                        ))
                    }
                };
                pos += op.len();
                tokens.push(Token::Comparator(op));
            }
            '*' | '/' | '+' | '-' => {
                tokens.push(Token::Arith(c));
                pos += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let literal: String = chars[start..pos].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    RuleSyntaxError::new(raw, format!("invalid number {literal:?}"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '%' || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_alphabetic() || chars[pos] == '%' || chars[pos] == '_')
                {
                    pos += 1;
                }
                tokens.push(Token::Word(chars[start..pos].iter().collect()));
            }
            _ => {
                return Err(RuleSyntaxError::new(
                    raw,
                    format!("unexpected character {c:?} at {pos}"),
                ))
            }
        }
    }

    Ok(tokens)
}
