use crate::editor::COMPLETION_MARKER;

/// One pipeline stage. `name` is the empty string for the no-op line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Positional arguments only; argv[0] is inserted by the engine at exec
    /// time.
    pub args: Vec<String>,
    /// Meaningful on the last stage of a pipeline only.
    pub background: bool,
    /// The raw line ended in an unterminated completion trigger.
    pub autocomplete: bool,
    pub redirect_in: Option<String>,
    pub redirect_out: Option<String>,
    pub redirect_append: Option<String>,
}

/// An ordered chain of stages built from a single input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

impl Pipeline {
    pub fn is_background(&self) -> bool {
        self.commands.last().map_or(false, |cmd| cmd.background)
    }
}

/// Turns a raw line into a pipeline. Pure and total: any token the parser
/// cannot classify becomes a plain argument, so parsing never fails, it only
/// under-interprets.
pub fn parse(line: &str) -> Pipeline {
    let mut rest = line.trim();

    let mut autocomplete = false;
    if let Some(stripped) = rest.strip_suffix(COMPLETION_MARKER) {
        autocomplete = true;
        rest = stripped.trim_end();
    }
    let mut background = false;
    if let Some(stripped) = rest.strip_suffix('&') {
        background = true;
        rest = stripped.trim_end();
    }

    let tokens = tokenize(rest);
    let mut commands: Vec<Command> = tokens
        .split(|tok| tok == "|")
        .filter(|stage| !stage.is_empty())
        .map(parse_stage)
        .collect();
    if commands.is_empty() {
        commands.push(Command::default());
    }

    if let Some(first) = commands.first_mut() {
        first.autocomplete = autocomplete;
    }
    if let Some(last) = commands.last_mut() {
        last.background = background;
    }
    Pipeline { commands }
}

/// Splits on runs of whitespace, except that a quoted span holds on to its
/// whitespace. The quotes stay in the token so a wholly wrapping pair can be
/// stripped later and a quoted operator is never mistaken for a real one.
/// An unterminated quote runs to the end of the line and stays verbatim.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut tok = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            chars.next();
            tok.push(c);
            if c == '"' || c == '\'' {
                for quoted in chars.by_ref() {
                    tok.push(quoted);
                    if quoted == c {
                        break;
                    }
                }
            }
        }
        tokens.push(tok);
    }
    tokens
}

fn parse_stage(tokens: &[String]) -> Command {
    let mut cmd = Command::default();
    let mut tokens = tokens.iter().map(String::as_str);

    if let Some(first) = tokens.next() {
        cmd.name = first.to_string();
    }
    while let Some(tok) = tokens.next() {
        if tok == "&" {
            // background was captured from the line tail already
            continue;
        }
        if let Some(rest) = tok.strip_prefix(">>") {
            cmd.redirect_append = redirect_target(rest, &mut tokens);
            cmd.redirect_out = None;
        } else if let Some(rest) = tok.strip_prefix('>') {
            cmd.redirect_out = redirect_target(rest, &mut tokens);
            cmd.redirect_append = None;
        } else if let Some(rest) = tok.strip_prefix('<') {
            cmd.redirect_in = redirect_target(rest, &mut tokens);
        } else {
            cmd.args.push(unquote(tok).to_string());
        }
    }
    cmd
}

/// The path either trails the operator in the same token (`>out.txt`) or is
/// the following token (`> out.txt`). A trailing operator with nothing after
/// it is dropped.
fn redirect_target<'a, I>(rest: &str, tokens: &mut I) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    if !rest.is_empty() {
        return Some(unquote(rest).to_string());
    }
    tokens.next().map(|tok| unquote(tok).to_string())
}

/// Strips one wholly wrapping pair of matching quotes; the interior is taken
/// verbatim, with no escape processing.
fn unquote(tok: &str) -> &str {
    let bytes = tok.as_bytes();
    if bytes.len() > 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &tok[1..tok.len() - 1]
    } else {
        tok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(line: &str) -> Command {
        let pipeline = parse(line);
        assert_eq!(pipeline.commands.len(), 1, "expected one stage: {:?}", pipeline);
        pipeline.commands.into_iter().next().unwrap()
    }

    #[test]
    fn plain_tokens_become_name_and_args() {
        let cmd = single("ls -l /tmp");
        assert_eq!(cmd.name, "ls");
        assert_eq!(cmd.args, vec!["-l", "/tmp"]);
    }

    #[test]
    fn surrounding_whitespace_is_irrelevant() {
        assert_eq!(parse("  ls -l\t"), parse("ls -l"));
    }

    #[test]
    fn empty_line_yields_the_noop_stage() {
        let cmd = single("");
        assert_eq!(cmd.name, "");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn trailing_ampersand_sets_background_on_the_last_stage() {
        let pipeline = parse("ls | sleep 5 &");
        assert!(!pipeline.commands[0].background);
        assert!(pipeline.commands[1].background);
        assert_eq!(pipeline.commands[1].args, vec!["5"]);
        assert!(pipeline.is_background());
    }

    #[test]
    fn lone_ampersand_token_is_consumed_silently() {
        let cmd = single("ls & -l");
        assert_eq!(cmd.args, vec!["-l"]);
    }

    #[test]
    fn one_pipe_makes_exactly_two_stages() {
        let pipeline = parse("ls -l | wc");
        assert_eq!(pipeline.commands.len(), 2);
        assert_eq!(pipeline.commands[0].name, "ls");
        assert_eq!(pipeline.commands[0].args, vec!["-l"]);
        assert_eq!(pipeline.commands[1].name, "wc");
        assert!(pipeline.commands[1].args.is_empty());
    }

    #[test]
    fn pipe_must_stand_alone_as_a_token() {
        let cmd = single("a|b");
        assert_eq!(cmd.name, "a|b");
    }

    #[test]
    fn quoted_argument_stays_whole() {
        let cmd = single("echo \"a b\"");
        assert_eq!(cmd.args, vec!["a b"]);
        let cmd = single("echo 'c d'");
        assert_eq!(cmd.args, vec!["c d"]);
    }

    #[test]
    fn unterminated_quote_is_kept_verbatim() {
        let cmd = single("echo \"a b'");
        assert_eq!(cmd.args, vec!["\"a b'"]);
    }

    #[test]
    fn quoted_whitespace_does_not_split_the_token() {
        let cmd = single("echo \"a b\" c");
        assert_eq!(cmd.args, vec!["a b", "c"]);
    }

    #[test]
    fn quoted_pipe_is_an_argument_not_a_separator() {
        let pipeline = parse("echo \"a | b\"");
        assert_eq!(pipeline.commands.len(), 1);
        assert_eq!(pipeline.commands[0].args, vec!["a | b"]);
    }

    #[test]
    fn quoted_redirect_target_is_unwrapped() {
        let cmd = single("sort >\"out file.txt\" < 'in file.txt'");
        assert_eq!(cmd.redirect_out.as_deref(), Some("out file.txt"));
        assert_eq!(cmd.redirect_in.as_deref(), Some("in file.txt"));
    }

    #[test]
    fn redirects_with_separated_operands() {
        let cmd = single("sort < in.txt > out.txt");
        assert_eq!(cmd.redirect_in.as_deref(), Some("in.txt"));
        assert_eq!(cmd.redirect_out.as_deref(), Some("out.txt"));
        assert!(cmd.redirect_append.is_none());
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn redirects_attached_to_the_operator() {
        let cmd = single("sort <in.txt >>log.txt");
        assert_eq!(cmd.redirect_in.as_deref(), Some("in.txt"));
        assert_eq!(cmd.redirect_append.as_deref(), Some("log.txt"));
        assert!(cmd.redirect_out.is_none());
    }

    #[test]
    fn later_output_redirect_wins() {
        let cmd = single("ls >a.txt >>b.txt");
        assert!(cmd.redirect_out.is_none());
        assert_eq!(cmd.redirect_append.as_deref(), Some("b.txt"));
    }

    #[test]
    fn completion_marker_is_stripped_and_flagged() {
        let cmd = single("ls?");
        assert!(cmd.autocomplete);
        assert_eq!(cmd.name, "ls");
    }

    #[test]
    fn second_stage_is_fully_parsed() {
        let pipeline = parse("cat notes.txt | grep -i 'a b' >hits.txt");
        let second = &pipeline.commands[1];
        assert_eq!(second.name, "grep");
        assert_eq!(second.args, vec!["-i", "a b"]);
        assert_eq!(second.redirect_out.as_deref(), Some("hits.txt"));
    }
}
