//! Mock kernel debug adapter for integration testing
//!
//! Speaks DAP over stdio the way a kernel's debug channel does: cells are
//! dumped to a source path with `dumpCell`, breakpoints are set against that
//! path, and `execute` runs the cell line by line, stopping on breakpoints.
//! Variables are whatever simple `name = value` assignments precede the
//! current line.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};

/// Id of the only thread the mock kernel runs
const MAIN_THREAD: i64 = 1;
/// Frame ids: the cell itself and the shell frame that called it
const CELL_FRAME: i64 = 1;
const SHELL_FRAME: i64 = 2;

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::default();

    while !state.disconnected {
        // Read Content-Length header
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).unwrap_or(0) == 0 {
            break; // EOF
        }

        if !header_line.starts_with("Content-Length:") {
            continue;
        }

        let content_length: usize = header_line
            .trim_start_matches("Content-Length:")
            .trim()
            .parse()
            .unwrap_or(0);

        // Read empty line
        let mut empty_line = String::new();
        reader.read_line(&mut empty_line).ok();

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            break;
        }

        let message: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if let Some(messages) = state.process_message(&message) {
            for message in messages {
                send_message(&mut writer, &message);
            }
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let Ok(body) = serde_json::to_string(message) else {
        return;
    };
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

#[derive(Default)]
struct MockState {
    seq: i64,
    disconnected: bool,
    /// Dumped cells by source path
    cells: HashMap<String, String>,
    breakpoints: HashMap<String, Vec<u32>>,
    /// Cell being executed
    running: Option<String>,
    current_line: u32,
    stopped: bool,
}

impl MockState {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn event(&mut self, event: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": event,
            "body": body
        })
    }

    fn process_message(&mut self, message: &Value) -> Option<Vec<Value>> {
        let msg_type = message.get("type")?.as_str()?;

        if msg_type != "request" {
            return None;
        }

        let command = message.get("command")?.as_str()?;
        let request_seq = message.get("seq")?.as_i64()?;
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let mut events = Vec::new();
        let seq = self.next_seq();

        let (success, body) = match command {
            "initialize" => (
                true,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsConditionalBreakpoints": false,
                    "supportsSetVariable": false
                }),
            ),
            "attach" => {
                events.push(self.event("initialized", json!(null)));
                (true, json!(null))
            }
            "dumpCell" => {
                let code = arguments["code"].as_str().unwrap_or_default().to_string();
                let path = cell_path(&code);
                self.cells.insert(path.clone(), code);
                (true, json!({ "sourcePath": path }))
            }
            "setBreakpoints" => {
                let path = arguments["source"]["path"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let line_count = self.cells.get(&path).map(|c| c.lines().count()).unwrap_or(0);

                let mut lines: Vec<u32> = arguments["breakpoints"]
                    .as_array()
                    .map(|bps| {
                        bps.iter()
                            .filter_map(|bp| bp["line"].as_u64())
                            .map(|line| line as u32)
                            .collect()
                    })
                    .unwrap_or_default();

                let breakpoints: Vec<Value> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, &line)| {
                        let verified = line >= 1 && (line as usize) <= line_count;
                        if verified {
                            json!({ "id": i + 1, "verified": true, "line": line })
                        } else {
                            json!({
                                "id": i + 1,
                                "verified": false,
                                "line": line,
                                "message": "Line is outside the cell"
                            })
                        }
                    })
                    .collect();

                lines.sort_unstable();
                lines.dedup();
                self.breakpoints.insert(path, lines);
                (true, json!({ "breakpoints": breakpoints }))
            }
            "configurationDone" => (true, json!(null)),
            "execute" => {
                let code = arguments["code"].as_str().unwrap_or_default();
                let path = cell_path(code);
                self.cells.entry(path.clone()).or_insert_with(|| code.to_string());
                self.running = Some(path);
                self.current_line = 0;

                events.push(self.event(
                    "thread",
                    json!({ "reason": "started", "threadId": MAIN_THREAD }),
                ));
                events.extend(self.run_to_breakpoint());
                (true, json!(null))
            }
            "threads" => (
                true,
                json!({ "threads": [{ "id": MAIN_THREAD, "name": "MainThread" }] }),
            ),
            "stackTrace" => {
                let frames = match (&self.running, self.stopped) {
                    (Some(path), true) => json!([
                        {
                            "id": CELL_FRAME,
                            "name": "<module>",
                            "source": { "path": path },
                            "line": self.current_line,
                            "column": 1
                        },
                        {
                            "id": SHELL_FRAME,
                            "name": "run_code",
                            "source": { "path": "/mock/interactiveshell.py" },
                            "line": 3577,
                            "column": 1
                        }
                    ]),
                    _ => json!([]),
                };
                (true, json!({ "stackFrames": frames }))
            }
            "scopes" => {
                let frame = arguments["frameId"].as_i64().unwrap_or(0);
                if frame == CELL_FRAME || frame == SHELL_FRAME {
                    (
                        true,
                        json!({ "scopes": [
                            { "name": "Locals", "variablesReference": frame * 10 + 1, "expensive": false },
                            { "name": "Globals", "variablesReference": frame * 10 + 2, "expensive": false }
                        ]}),
                    )
                } else {
                    (false, json!({ "message": format!("Unknown frame {}", frame) }))
                }
            }
            "variables" => {
                let reference = arguments["variablesReference"].as_i64().unwrap_or(0);
                let variables = match reference {
                    r if r == CELL_FRAME * 10 + 1 || r == CELL_FRAME * 10 + 2 => {
                        self.assignments()
                    }
                    r if r == SHELL_FRAME * 10 + 1 => vec![json!({
                        "name": "cell_name",
                        "value": "'<cell>'",
                        "type": "str",
                        "variablesReference": 0
                    })],
                    _ => Vec::new(),
                };
                (true, json!({ "variables": variables }))
            }
            "continue" => {
                events.push(self.event(
                    "continued",
                    json!({ "threadId": MAIN_THREAD, "allThreadsContinued": true }),
                ));
                events.extend(self.run_to_breakpoint());
                (true, json!({ "allThreadsContinued": true }))
            }
            "next" | "stepIn" => {
                if self.stopped {
                    events.extend(self.step());
                    (true, json!(null))
                } else {
                    (false, json!({ "message": "Thread is not stopped" }))
                }
            }
            "disconnect" => {
                self.disconnected = true;
                self.running = None;
                self.stopped = false;
                (true, json!(null))
            }
            _ => (
                false,
                json!({ "message": format!("Unknown command: {}", command) }),
            ),
        };

        let mut response = json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_seq,
            "success": success,
            "command": command,
            "body": body
        });
        if !success {
            response["message"] = body["message"].clone();
        }

        let mut messages = vec![response];
        messages.extend(events);
        Some(messages)
    }

    fn line_count(&self) -> u32 {
        self.running
            .as_ref()
            .and_then(|path| self.cells.get(path))
            .map(|code| code.lines().count() as u32)
            .unwrap_or(0)
    }

    /// Resume until the next breakpoint after the current line, or finish
    fn run_to_breakpoint(&mut self) -> Vec<Value> {
        let next = self
            .running
            .as_ref()
            .and_then(|path| self.breakpoints.get(path))
            .and_then(|lines| {
                lines
                    .iter()
                    .copied()
                    .find(|&line| line > self.current_line && line <= self.line_count())
            });

        match next {
            Some(line) => self.stop_at(line, "breakpoint"),
            None => self.finish(),
        }
    }

    fn step(&mut self) -> Vec<Value> {
        let line = self.current_line + 1;
        if line > self.line_count() {
            self.finish()
        } else {
            self.stop_at(line, "step")
        }
    }

    fn stop_at(&mut self, line: u32, reason: &str) -> Vec<Value> {
        self.current_line = line;
        self.stopped = true;
        vec![self.event(
            "stopped",
            json!({ "reason": reason, "threadId": MAIN_THREAD, "allThreadsStopped": true }),
        )]
    }

    fn finish(&mut self) -> Vec<Value> {
        self.running = None;
        self.stopped = false;
        vec![
            self.event(
                "thread",
                json!({ "reason": "exited", "threadId": MAIN_THREAD }),
            ),
            self.event("exited", json!({ "exitCode": 0 })),
            self.event("terminated", json!(null)),
        ]
    }

    /// `name = value` assignments on the lines already executed
    fn assignments(&self) -> Vec<Value> {
        let Some(code) = self.running.as_ref().and_then(|path| self.cells.get(path)) else {
            return Vec::new();
        };

        let mut values: Vec<(String, String)> = Vec::new();
        for line in code.lines().take(self.current_line.saturating_sub(1) as usize) {
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            let is_identifier = !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit());
            if !is_identifier || value.is_empty() || value.starts_with('=') {
                continue;
            }
            match values.iter_mut().find(|(n, _)| n == name) {
                Some(existing) => existing.1 = value.to_string(),
                None => values.push((name.to_string(), value.to_string())),
            }
        }

        values
            .into_iter()
            .map(|(name, value)| {
                json!({
                    "name": name,
                    "type": type_of(&value),
                    "value": value,
                    "variablesReference": 0
                })
            })
            .collect()
    }
}

/// Stable per-content path, like a kernel's cell file naming
fn cell_path(code: &str) -> String {
    let hash = code
        .bytes()
        .fold(0x811c_9dc5_u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    format!("/tmp/mock-kernel/cell-{:08x}.py", hash)
}

fn type_of(value: &str) -> &'static str {
    if value.parse::<i64>().is_ok() {
        "int"
    } else if value.parse::<f64>().is_ok() {
        "float"
    } else if value.starts_with('\'') || value.starts_with('"') {
        "str"
    } else {
        "object"
    }
}
