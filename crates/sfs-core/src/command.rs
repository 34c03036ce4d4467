//! Line-oriented command surface.
//!
//! A line is split into tokens by [`tokenize`], turned into a typed
//! [`Command`] by [`Command::parse`] (which checks the argument count
//! before anything touches the filesystem), then run by
//! [`SimFs::execute`].

use crate::{FsUsage, ListEntry, SimFs, StatInfo, TreeNode};
use serde::Serialize;
use sfs_error::{Result, SfsError};
use sfs_types::Fd;

/// Split a command line on whitespace.
///
/// A token wrapped in double quotes may contain whitespace; the quotes are
/// not part of the token. An unterminated quote is an error.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut token = String::new();
        if first == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => token.push(c),
                    None => {
                        return Err(SfsError::InvalidArgument(format!(
                            "unterminated quote in {line:?}"
                        )));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { path: String, mode: String },
    Read { fd: Fd, len: u64 },
    Write { fd: Fd, data: String },
    Seek { fd: Fd, offset: u64 },
    Close { fd: Fd },
    Mkdir { paths: Vec<String> },
    Rmdir { paths: Vec<String> },
    Cd { path: String },
    Link { src: String, dest: String },
    Unlink { path: String },
    Stat { paths: Vec<String> },
    Ls,
    Cat { paths: Vec<String> },
    Cp { src: String, dest: String },
    Pwd,
    Tree,
    Df,
}

/// Every verb with its argument synopsis.
pub const VERBS: &[(&str, &str)] = &[
    ("open", "open <path> <r|w|rw>"),
    ("read", "read <fd> <n>"),
    ("write", "write <fd> <data>"),
    ("seek", "seek <fd> <offset>"),
    ("close", "close <fd>"),
    ("mkdir", "mkdir <path>..."),
    ("rmdir", "rmdir <path>..."),
    ("cd", "cd <path>"),
    ("link", "link <src> <dest>"),
    ("unlink", "unlink <path>"),
    ("stat", "stat <path>..."),
    ("ls", "ls"),
    ("cat", "cat <path>..."),
    ("cp", "cp <src> <dest>"),
    ("pwd", "pwd"),
    ("tree", "tree"),
    ("df", "df"),
];

fn usage(verb: &str) -> SfsError {
    let synopsis = VERBS
        .iter()
        .find(|(name, _)| *name == verb)
        .map_or(verb, |&(_, synopsis)| synopsis);
    SfsError::Usage {
        verb: verb.to_owned(),
        usage: synopsis.to_owned(),
    }
}

fn exact<'a, const N: usize>(verb: &str, args: &'a [String]) -> Result<&'a [String; N]> {
    args.try_into().map_err(|_| usage(verb))
}

fn at_least_one(verb: &str, args: &[String]) -> Result<Vec<String>> {
    if args.is_empty() {
        return Err(usage(verb));
    }
    Ok(args.to_vec())
}

fn number(what: &str, token: &str) -> Result<u64> {
    token.parse().map_err(|_| {
        SfsError::InvalidArgument(format!(
            "{what} must be a non-negative integer, got {token:?}"
        ))
    })
}

impl Command {
    /// Parse a command line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        let tokens = tokenize(trimmed)?;
        match tokens.split_first() {
            Some((verb, args)) => Self::from_tokens(verb, args).map(Some),
            None => Ok(None),
        }
    }

    /// Build a command from its verb and argument tokens.
    pub fn from_tokens(verb: &str, args: &[String]) -> Result<Self> {
        Ok(match verb {
            "open" => {
                let [path, mode] = exact::<2>(verb, args)?;
                Self::Open {
                    path: path.clone(),
                    mode: mode.clone(),
                }
            }
            "read" => {
                let [fd, len] = exact::<2>(verb, args)?;
                Self::Read {
                    fd: Fd(number("descriptor", fd)?),
                    len: number("length", len)?,
                }
            }
            "write" => {
                let [fd, data] = exact::<2>(verb, args)?;
                Self::Write {
                    fd: Fd(number("descriptor", fd)?),
                    data: data.clone(),
                }
            }
            "seek" => {
                let [fd, offset] = exact::<2>(verb, args)?;
                Self::Seek {
                    fd: Fd(number("descriptor", fd)?),
                    offset: number("offset", offset)?,
                }
            }
            "close" => {
                let [fd] = exact::<1>(verb, args)?;
                Self::Close {
                    fd: Fd(number("descriptor", fd)?),
                }
            }
            "mkdir" => Self::Mkdir {
                paths: at_least_one(verb, args)?,
            },
            "rmdir" => Self::Rmdir {
                paths: at_least_one(verb, args)?,
            },
            "cd" => {
                let [path] = exact::<1>(verb, args)?;
                Self::Cd { path: path.clone() }
            }
            "link" => {
                let [src, dest] = exact::<2>(verb, args)?;
                Self::Link {
                    src: src.clone(),
                    dest: dest.clone(),
                }
            }
            "unlink" => {
                let [path] = exact::<1>(verb, args)?;
                Self::Unlink { path: path.clone() }
            }
            "stat" => Self::Stat {
                paths: at_least_one(verb, args)?,
            },
            "cat" => Self::Cat {
                paths: at_least_one(verb, args)?,
            },
            "cp" => {
                let [src, dest] = exact::<2>(verb, args)?;
                Self::Cp {
                    src: src.clone(),
                    dest: dest.clone(),
                }
            }
            "ls" | "pwd" | "tree" | "df" => {
                let [] = exact::<0>(verb, args)?;
                match verb {
                    "ls" => Self::Ls,
                    "pwd" => Self::Pwd,
                    "tree" => Self::Tree,
                    _ => Self::Df,
                }
            }
            other => {
                return Err(SfsError::InvalidArgument(format!(
                    "unknown command {other:?}"
                )));
            }
        })
    }

    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Seek { .. } => "seek",
            Self::Close { .. } => "close",
            Self::Mkdir { .. } => "mkdir",
            Self::Rmdir { .. } => "rmdir",
            Self::Cd { .. } => "cd",
            Self::Link { .. } => "link",
            Self::Unlink { .. } => "unlink",
            Self::Stat { .. } => "stat",
            Self::Ls => "ls",
            Self::Cat { .. } => "cat",
            Self::Cp { .. } => "cp",
            Self::Pwd => "pwd",
            Self::Tree => "tree",
            Self::Df => "df",
        }
    }
}

/// Successful result of one command, or of one path of a multi-path
/// command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Opened(Fd),
    Read(Vec<u8>),
    Written(u64),
    Sought(u64),
    Closed(Fd),
    Created(String),
    Removed(String),
    Changed(String),
    Linked { src: String, dest: String },
    Unlinked(String),
    Stat(StatInfo),
    Listing(Vec<ListEntry>),
    Contents(Vec<u8>),
    Copied(u64),
    Cwd(String),
    Tree(TreeNode),
    Usage(FsUsage),
}

impl SimFs {
    /// Run one command.
    ///
    /// Multi-path verbs yield one result per path and keep going after a
    /// failure; every other verb yields exactly one result.
    pub fn execute(&mut self, command: &Command) -> Vec<Result<Outcome>> {
        let single = match command {
            Command::Mkdir { paths } => {
                return paths
                    .iter()
                    .map(|p| self.mkdir(p).map(|_| Outcome::Created(p.clone())))
                    .collect();
            }
            Command::Rmdir { paths } => {
                return paths
                    .iter()
                    .map(|p| self.rmdir(p).map(|()| Outcome::Removed(p.clone())))
                    .collect();
            }
            Command::Stat { paths } => {
                return paths
                    .iter()
                    .map(|p| self.stat(p).map(Outcome::Stat))
                    .collect();
            }
            Command::Cat { paths } => {
                return paths
                    .iter()
                    .map(|p| self.cat(p).map(Outcome::Contents))
                    .collect();
            }
            Command::Open { path, mode } => self.open(path, mode).map(Outcome::Opened),
            Command::Read { fd, len } => self.read(*fd, *len).map(Outcome::Read),
            Command::Write { fd, data } => self.write(*fd, data.as_bytes()).map(Outcome::Written),
            Command::Seek { fd, offset } => {
                self.seek(*fd, *offset).map(|()| Outcome::Sought(*offset))
            }
            Command::Close { fd } => self.close(*fd).map(|()| Outcome::Closed(*fd)),
            Command::Cd { path } => self.cd(path).and_then(|()| self.pwd().map(Outcome::Changed)),
            Command::Link { src, dest } => self.link(src, dest).map(|()| Outcome::Linked {
                src: src.clone(),
                dest: dest.clone(),
            }),
            Command::Unlink { path } => self.unlink(path).map(|()| Outcome::Unlinked(path.clone())),
            Command::Ls => self.ls().map(Outcome::Listing),
            Command::Cp { src, dest } => self.cp(src, dest).map(Outcome::Copied),
            Command::Pwd => self.pwd().map(Outcome::Cwd),
            Command::Tree => self.tree().map(Outcome::Tree),
            Command::Df => Ok(Outcome::Usage(self.usage())),
        };
        vec![single]
    }
}
