//! `stratadb-cli`: an interactive client for `stratadb-server`. Modelled on
//! the original `cmd/client` — tab completion over the fixed command table,
//! `help`/`help <command>`, persisted command history, `quit`/`exit` to
//! leave — rebuilt on `rustyline` instead of `liner`.

use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;

use clap::{Arg, Command};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use rustyline::error::ReadlineError;

use stratadb::resp::Reply;

/// `(name, usage, group)`, in the same shape and order as the original
/// client's help table.
const COMMANDS: &[(&str, &str, &str)] = &[
    ("SET", "key value", "STRING"),
    ("GET", "key", "STRING"),
    ("SETNX", "key value", "STRING"),
    ("GETSET", "key value", "STRING"),
    ("APPEND", "key value", "STRING"),
    ("STRLEN", "key", "STRING"),
    ("STREXISTS", "key", "STRING"),
    ("STRREM", "key", "STRING"),
    ("PREFIXSCAN", "prefix limit offset", "STRING"),
    ("RANGESCAN", "start end", "STRING"),
    ("EXPIRE", "key seconds", "STRING"),
    ("PERSIST", "key", "STRING"),
    ("TTL", "key", "STRING"),
    ("LPUSH", "key value", "LIST"),
    ("RPUSH", "key value", "LIST"),
    ("LPOP", "key", "LIST"),
    ("RPOP", "key", "LIST"),
    ("LINDEX", "key index", "LIST"),
    ("LREM", "key count value", "LIST"),
    ("LINSERT", "key BEFORE|AFTER pivot element", "LIST"),
    ("LSET", "key index value", "LIST"),
    ("LTRIM", "key start end", "LIST"),
    ("LRANGE", "key start end", "LIST"),
    ("LLEN", "key", "LIST"),
    ("LKEYEXISTS", "key", "LIST"),
    ("LVALEXISTS", "key value", "LIST"),
    ("HSET", "key field value", "HASH"),
    ("HSETNX", "key field value", "HASH"),
    ("HGET", "key field", "HASH"),
    ("HGETALL", "key", "HASH"),
    ("HDEL", "key field", "HASH"),
    ("HEXISTS", "key field", "HASH"),
    ("HLEN", "key", "HASH"),
    ("HKEYS", "key", "HASH"),
    ("HVALS", "key", "HASH"),
    ("HMSET", "key field value [field value...]", "HASH"),
    ("HMGET", "key field [field...]", "HASH"),
    ("SADD", "key member", "SET"),
    ("SPOP", "key count", "SET"),
    ("SISMEMBER", "key member", "SET"),
    ("SRANDMEMBER", "key count", "SET"),
    ("SREM", "key member", "SET"),
    ("SMOVE", "src dst member", "SET"),
    ("SCARD", "key", "SET"),
    ("SMEMBERS", "key", "SET"),
    ("SUNION", "key [key...]", "SET"),
    ("SDIFF", "key [key...]", "SET"),
    ("ZADD", "key score member", "ZSET"),
    ("ZSCORE", "key member", "ZSET"),
    ("ZCARD", "key", "ZSET"),
    ("ZRANK", "key member", "ZSET"),
    ("ZREVRANK", "key member", "ZSET"),
    ("ZREM", "key member", "ZSET"),
    ("ZINCRBY", "key member increment", "ZSET"),
    ("ZGETBYRANK", "key rank", "ZSET"),
    ("ZREVGETBYRANK", "key rank", "ZSET"),
    ("ZSCORERANGE", "key min max", "ZSET"),
    ("ZREVSCORERANGE", "key max min", "ZSET"),
    ("ZRANGE", "key start end", "ZSET"),
    ("ZREVRANGE", "key start end", "ZSET"),
    ("RECLAIM", "", "ADMIN"),
    ("RECLAIMSEGMENT", "", "ADMIN"),
    ("PING", "", "ADMIN"),
];

struct CommandHelper;

impl Completer for CommandHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let prefix = line[..pos].to_ascii_lowercase();
        let matches = COMMANDS
            .iter()
            .filter(|(name, _, _)| name.to_ascii_lowercase().starts_with(&prefix))
            .map(|(name, _, _)| {
                let lower = name.to_ascii_lowercase();
                Pair { display: lower.clone(), replacement: lower }
            })
            .collect();
        Ok((0, matches))
    }
}

impl Hinter for CommandHelper {
    type Hint = String;
}

impl Highlighter for CommandHelper {}
impl Validator for CommandHelper {}
impl Helper for CommandHelper {}

fn cli() -> clap::ArgMatches {
    Command::new("stratadb-cli")
        .about("Interactive client for stratadb-server")
        .version("0.1.0")
        .arg(Arg::new("host").short('h').long("host").help("Server host").default_value("127.0.0.1"))
        .arg(Arg::new("port").short('p').long("port").help("Server port").default_value("6767"))
        .get_matches()
}

fn print_help() {
    println!(
        "\n Thanks for using stratadb\n stratadb-cli\n To get help about a command:\n\tType: \"help <command>\" for help on that command\n To quit:\n\t<ctrl+c> or <quit> or <exit>"
    );
}

fn print_command_help(name: &str) {
    let lower = name.to_ascii_lowercase();
    match COMMANDS.iter().find(|(n, _, _)| n.eq_ignore_ascii_case(&lower)) {
        Some((name, usage, group)) => println!("\n--usage: {} {}\n--group: {}\n", name.to_ascii_lowercase(), usage, group),
        None => println!("(error) ERR unknown command '{lower}'"),
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Simple(s) => println!("{s}"),
        Reply::Error(s) => println!("(error) {s}"),
        Reply::Integer(n) => println!("(integer) {n}"),
        Reply::Nil => println!("(nil)"),
        Reply::Bulk(b) => println!("{}", String::from_utf8_lossy(b)),
        Reply::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    Reply::Bulk(b) => println!("{}) {}", i + 1, String::from_utf8_lossy(b)),
                    other => println!("{}) {other:?}", i + 1),
                }
            }
        }
    }
}

fn send_command(stream: &mut TcpStream, parts: &[String]) -> std::io::Result<Reply> {
    let mut out = Vec::new();
    write!(out, "*{}\r\n", parts.len())?;
    for part in parts {
        write!(out, "${}\r\n", part.len())?;
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    stream.write_all(&out)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream.try_clone()?);
    read_single_reply(&mut reader)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "server closed connection"))
}

/// Reads one RESP value written by the server. Only used client-side, so it
/// understands the same five encodings `Reply::encode` produces.
fn read_single_reply(reader: &mut impl std::io::BufRead) -> std::io::Result<Option<Reply>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim_end();
    if line.is_empty() {
        return Err(resp_protocol_error(line));
    }
    let (tag, rest) = line.split_at(1);
    let reply = match tag {
        "+" => Reply::Simple(rest.to_string()),
        "-" => Reply::Error(rest.to_string()),
        ":" => Reply::Integer(rest.parse().unwrap_or(0)),
        "$" => {
            let len: i64 = rest.parse().unwrap_or(-1);
            if len < 0 {
                Reply::Nil
            } else {
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf)?;
                buf.truncate(len as usize);
                Reply::Bulk(buf)
            }
        }
        "*" => {
            let count: i64 = rest.parse().unwrap_or(-1);
            if count < 0 {
                Reply::Array(Vec::new())
            } else {
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    match read_single_reply(reader)? {
                        Some(item) => items.push(item),
                        None => break,
                    }
                }
                Reply::Array(items)
            }
        }
        _ => return Err(resp_protocol_error(line)),
    };
    Ok(Some(reply))
}

fn resp_protocol_error(line: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, format!("unrecognised reply: '{line}'"))
}

fn history_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".stratadb_history"),
        None => std::env::temp_dir().join(".stratadb_history"),
    }
}

fn main() -> std::io::Result<()> {
    let matches = cli();
    let host = matches.get_one::<String>("host").unwrap();
    let port = matches.get_one::<String>("port").unwrap();
    let addr = format!("{host}:{port}");

    let mut stream = TcpStream::connect(&addr)?;
    println!("connected to {addr}");

    let mut editor: Editor<CommandHelper, rustyline::history::DefaultHistory> =
        Editor::new().expect("failed to start line editor");
    editor.set_helper(Some(CommandHelper));
    let history = history_path();
    let _ = editor.load_history(&history);

    let command_names: Vec<String> = COMMANDS.iter().map(|(n, _, _)| n.to_ascii_lowercase()).collect();
    let prompt = format!("{addr}>");

    loop {
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                let first = parts[0].to_ascii_lowercase();

                if first == "help" && parts.len() == 1 {
                    print_help();
                    continue;
                }
                if first == "help" && parts.len() == 2 {
                    print_command_help(&parts[1]);
                    continue;
                }
                if first == "quit" || first == "exit" {
                    break;
                }
                if !command_names.contains(&first) {
                    println!("(error) ERR unknown command '{first}'");
                    continue;
                }

                let _ = editor.add_history_entry(&line);
                match send_command(&mut stream, &parts) {
                    Ok(reply) => print_reply(&reply),
                    Err(e) => println!("(error) {e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("readline error: {e}");
                break;
            }
        }
    }
    let _ = editor.save_history(&history);
    Ok(())
}
