//! Tokenizer for callback bodies

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "&&", "||", "(", ")", "{", "}", "[", "]", ",", ";", ":", "?",
    ".", "!", "=", "+", "-",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err("unterminated block comment".to_string());
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if c == '"' || c == '\'' {
            let (literal, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(literal));
            i = next;
            continue;
        }

        if c == '`' {
            return Err("template literals are not supported".to_string());
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number literal `{}`", text))?;
            tokens.push(Token::Num(value));
            continue;
        }

        if c == '_' || c == '$' || c.is_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i] == '_' || chars[i] == '$' || chars[i].is_alphanumeric()) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(&punct) => {
                tokens.push(Token::Punct(punct));
                i += punct.len();
            }
            None => return Err(format!("unexpected character `{}`", c)),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\n' {
            break;
        }
        if c == '\\' {
            let escaped = chars.get(i + 1).ok_or("unterminated escape sequence")?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => *other,
            });
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
    }

    Err("unterminated string literal".to_string())
}
