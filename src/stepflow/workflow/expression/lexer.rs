// SPDX-License-Identifier: MIT

//! Tokenizer for workflow expressions

use crate::adk::error::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Identifier, including `$`-prefixed roots and word operators
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    AndAnd,
    OrOr,
    QuestionQuestion,
    Eof,
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Split an expression into tokens
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, EvaluationError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = |token: Token| Spanned {
            token,
            position: pos,
        };

        match c {
            '(' => tokens.push(single(Token::LParen)),
            ')' => tokens.push(single(Token::RParen)),
            '[' => tokens.push(single(Token::LBracket)),
            ']' => tokens.push(single(Token::RBracket)),
            ',' => tokens.push(single(Token::Comma)),
            ':' => tokens.push(single(Token::Colon)),
            '+' => tokens.push(single(Token::Plus)),
            '-' => tokens.push(single(Token::Minus)),
            '*' => tokens.push(single(Token::Star)),
            '/' => tokens.push(single(Token::Slash)),
            '%' => tokens.push(single(Token::Percent)),
            '.' if !peek(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(single(Token::Dot))
            }
            '?' => {
                if peek(i + 1) == Some('?') {
                    tokens.push(single(Token::QuestionQuestion));
                    i += 1;
                } else {
                    tokens.push(single(Token::Question));
                }
            }
            '!' => {
                if peek(i + 1) == Some('=') {
                    tokens.push(single(Token::NotEq));
                    i += 1;
                    if peek(i + 1) == Some('=') {
                        i += 1;
                    }
                } else {
                    tokens.push(single(Token::Bang));
                }
            }
            '=' => match peek(i + 1) {
                Some('=') => {
                    tokens.push(single(Token::EqEq));
                    i += 1;
                    if peek(i + 1) == Some('=') {
                        i += 1;
                    }
                }
                Some('>') => return Err(EvaluationError::Sandbox("=>".to_string())),
                _ => return Err(EvaluationError::Sandbox("=".to_string())),
            },
            '<' => {
                if peek(i + 1) == Some('=') {
                    tokens.push(single(Token::Lte));
                    i += 1;
                } else {
                    tokens.push(single(Token::Lt));
                }
            }
            '>' => {
                if peek(i + 1) == Some('=') {
                    tokens.push(single(Token::Gte));
                    i += 1;
                } else {
                    tokens.push(single(Token::Gt));
                }
            }
            '&' => {
                if peek(i + 1) == Some('&') {
                    tokens.push(single(Token::AndAnd));
                    i += 1;
                } else {
                    return Err(EvaluationError::syntax(pos, "bitwise '&' is not supported"));
                }
            }
            '|' => {
                if peek(i + 1) == Some('|') {
                    tokens.push(single(Token::OrOr));
                    i += 1;
                } else {
                    return Err(EvaluationError::syntax(pos, "bitwise '|' is not supported"));
                }
            }
            '\'' | '"' => {
                let (value, next) = read_string(&chars, i, c)?;
                tokens.push(single(Token::Str(value)));
                i = next;
                continue;
            }
            '`' => return Err(EvaluationError::Sandbox("template literal".to_string())),
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                // exponent part
                if i < chars.len() && (chars[i].1 == 'e' || chars[i].1 == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j].1 == '+' || chars[j].1 == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| EvaluationError::syntax(pos, format!("invalid number '{}'", text)))?;
                tokens.push(single(Token::Number(number)));
                continue;
            }
            c if c == '$' || c == '_' || c.is_alphabetic() => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].1 == '_' || chars[i].1.is_alphanumeric()) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(single(Token::Ident(text)));
                continue;
            }
            other => {
                return Err(EvaluationError::syntax(
                    pos,
                    format!("unexpected character '{}'", other),
                ))
            }
        }
        i += 1;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), EvaluationError> {
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' {
            i += 1;
            let escaped = chars
                .get(i)
                .map(|(_, c)| *c)
                .ok_or_else(|| EvaluationError::syntax(chars[start].0, "unterminated string"))?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
        } else {
            value.push(c);
        }
        i += 1;
    }
    Err(EvaluationError::syntax(chars[start].0, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("$input.value >= 50"),
            vec![
                Token::Ident("$input".into()),
                Token::Dot,
                Token::Ident("value".into()),
                Token::Gte,
                Token::Number(50.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strict_equality_collapses() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                Token::Ident("a".into()),
                Token::EqEq,
                Token::Ident("b".into()),
                Token::NotEq,
                Token::Ident("c".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "two""#),
            vec![
                Token::Str("it's".into()),
                Token::Str("two".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1.5 .5 2e3"),
            vec![
                Token::Number(1.5),
                Token::Number(0.5),
                Token::Number(2000.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_assignment_and_arrows_rejected() {
        assert!(matches!(
            tokenize("x = 1"),
            Err(EvaluationError::Sandbox(_))
        ));
        assert!(matches!(
            tokenize("x => x"),
            Err(EvaluationError::Sandbox(_))
        ));
        assert!(matches!(
            tokenize("`${x}`"),
            Err(EvaluationError::Sandbox(_))
        ));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert!(err.is_syntax());
    }
}
