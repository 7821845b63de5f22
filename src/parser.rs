/// A parsed command line: the pipeline stages plus line-level redirections
/// and the background flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    /// Pipeline stages in order; each stage is a non-empty argument vector.
    pub commands: Vec<Vec<String>>,
    pub infile: Option<String>,
    pub outfile: Option<String>,
    /// Append to `outfile` instead of truncating it.
    pub append: bool,
    pub background: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    RedirectIn,
    RedirectOut,
    RedirectAppend,
    Background,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building a word — whitespace or an operator ends it
    InWord,
    /// Inside double quotes — whitespace and operators are literal
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

/// Tokenize input into words and operators. `|`, `<`, `>`, `>>` and `&` are
/// self-delimiting: they end the word being built, so `a|b` and `a | b`
/// tokenize identically. Quoting and backslash escapes make any character
/// literal, operators included.
fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    fn operator(
        tokens: &mut Vec<Token>,
        ch: char,
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) {
        match ch {
            '|' => tokens.push(Token::Pipe),
            '&' => tokens.push(Token::Background),
            '<' => tokens.push(Token::RedirectIn),
            _ => {
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::RedirectAppend);
                } else {
                    tokens.push(Token::RedirectOut);
                }
            }
        }
    }

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            // ── Normal state: between tokens ──
            (State::Normal, ' ' | '\t') => {}
            (State::Normal, '|' | '&' | '<' | '>') => {
                operator(&mut tokens, ch, &mut chars);
            }
            (State::Normal, '"') => {
                state = State::InDoubleQuote;
            }
            (State::Normal, '\'') => {
                state = State::InSingleQuote;
            }
            (State::Normal, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
                state = State::InWord;
            }
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            // ── InWord state: building a token ──
            (State::InWord, ' ' | '\t') => {
                tokens.push(Token::Word(std::mem::take(&mut current)));
                state = State::Normal;
            }
            (State::InWord, '|' | '&' | '<' | '>') => {
                tokens.push(Token::Word(std::mem::take(&mut current)));
                operator(&mut tokens, ch, &mut chars);
                state = State::Normal;
            }
            (State::InWord, '"') => {
                state = State::InDoubleQuote;
            }
            (State::InWord, '\'') => {
                state = State::InSingleQuote;
            }
            (State::InWord, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
            }
            (State::InWord, c) => {
                current.push(c);
            }

            // ── InDoubleQuote state: inside "..." ──
            (State::InDoubleQuote, '"') => {
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&'"' | &'\\') => {
                    current.push(chars.next().unwrap_or('\\'));
                }
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => {
                current.push(c);
            }

            // ── InSingleQuote state: inside '...' ──
            (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InSingleQuote, c) => {
                current.push(c);
            }
        }
    }

    match state {
        State::Normal => {}
        State::InWord => tokens.push(Token::Word(current)),
        State::InDoubleQuote | State::InSingleQuote => {
            return Err("unterminated quote".to_string());
        }
    }

    Ok(tokens)
}

/// Parse one input line into a [`CommandLine`].
///
/// Rules: `|` separates stages and every stage needs at least one word; `<`,
/// `>` and `>>` each take a following file-name word, with the last
/// occurrence winning if one is repeated; `&` must be the final token.
pub fn parse(input: &str) -> Result<CommandLine, String> {
    let mut line = CommandLine {
        commands: vec![Vec::new()],
        ..CommandLine::default()
    };

    let mut tokens = tokenize(input)?.into_iter();
    while let Some(token) = tokens.next() {
        if line.background {
            return Err("'&' must come last".to_string());
        }
        match token {
            Token::Word(word) => {
                // commands is never empty: it starts with one stage and
                // only grows.
                if let Some(stage) = line.commands.last_mut() {
                    stage.push(word);
                }
            }
            Token::Pipe => {
                if line.commands.last().is_none_or(|stage| stage.is_empty()) {
                    return Err("missing command before '|'".to_string());
                }
                line.commands.push(Vec::new());
            }
            Token::RedirectIn => match tokens.next() {
                Some(Token::Word(name)) => line.infile = Some(name),
                _ => return Err("missing file name after '<'".to_string()),
            },
            Token::RedirectOut => match tokens.next() {
                Some(Token::Word(name)) => {
                    line.outfile = Some(name);
                    line.append = false;
                }
                _ => return Err("missing file name after '>'".to_string()),
            },
            Token::RedirectAppend => match tokens.next() {
                Some(Token::Word(name)) => {
                    line.outfile = Some(name);
                    line.append = true;
                }
                _ => return Err("missing file name after '>>'".to_string()),
            },
            Token::Background => line.background = true,
        }
    }

    if line.commands.last().is_none_or(|stage| stage.is_empty()) {
        if line.commands.len() > 1 {
            return Err("missing command after '|'".to_string());
        }
        return Err("missing command".to_string());
    }

    Ok(line)
}
