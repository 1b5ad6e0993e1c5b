use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use cortex_agent::ActivityState;

use crate::render::Piece;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const TABLE: Color = Color::White;
    const CHART: Color = Color::Blue;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Manages terminal I/O for the interactive REPL.
pub struct Terminal {
    /// Whether the cursor sits at the start of a line.
    at_line_start: bool,
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            at_line_start: true,
        }
    }

    /// Print the startup banner.
    pub fn print_banner(&mut self, endpoint: &str, model: Option<&str>) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("cortex-chat"),
            ResetColor,
            Print(" - Snowflake Cortex agent chat\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "Endpoint: {} | Model: {}\n",
                endpoint,
                model.unwrap_or("server default")
            )),
            Print("Type 'exit' or 'quit' to end.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        self.at_line_start = true;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns None if the user wants to exit.
    pub fn read_input(&mut self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        // EOF (Ctrl+D) ends the session.
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        self.at_line_start = true;
        let trimmed = input.trim().to_string();

        if trimmed == "exit" || trimmed == "quit" || trimmed == "/exit" || trimmed == "/quit" {
            return Ok(None);
        }

        Ok(Some(trimmed))
    }

    /// Display one piece of assistant output.
    pub fn print_piece(&mut self, piece: &Piece) -> Result<()> {
        let mut stdout = io::stdout();
        match piece {
            Piece::Text(text) => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::ASSISTANT_TEXT),
                    Print(text),
                    ResetColor,
                )?;
                self.at_line_start = text.ends_with('\n');
            }
            Piece::ToolUse(name) => {
                self.start_line(&mut stdout)?;
                execute!(
                    stdout,
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[tool: {}]\n", name)),
                    ResetColor,
                )?;
                self.at_line_start = true;
            }
            Piece::ToolResult(name) => {
                self.start_line(&mut stdout)?;
                execute!(
                    stdout,
                    SetForegroundColor(Colors::TOOL_RESULT),
                    Print(format!("[result: {}]\n", name)),
                    ResetColor,
                )?;
                self.at_line_start = true;
            }
            Piece::Table(markdown) => {
                self.start_line(&mut stdout)?;
                execute!(
                    stdout,
                    SetForegroundColor(Colors::TABLE),
                    Print(markdown),
                    ResetColor,
                )?;
                self.at_line_start = markdown.ends_with('\n');
            }
            Piece::Chart(summary) => {
                self.start_line(&mut stdout)?;
                execute!(
                    stdout,
                    SetForegroundColor(Colors::CHART),
                    Print(format!("[{}]\n", summary)),
                    ResetColor,
                )?;
                self.at_line_start = true;
            }
        }
        stdout.flush()?;
        Ok(())
    }

    /// Dim status line for an activity change. Idle and streaming are not
    /// announced; the prompt and the text itself show those.
    pub fn print_activity(&mut self, activity: ActivityState) -> Result<()> {
        if matches!(activity, ActivityState::Idle | ActivityState::Streaming) {
            return Ok(());
        }
        let mut stdout = io::stdout();
        self.start_line(&mut stdout)?;
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("... {}\n", activity)),
            ResetColor,
        )?;
        stdout.flush()?;
        self.at_line_start = true;
        Ok(())
    }

    pub fn print_citations(&mut self, citations: &[String]) -> Result<()> {
        if citations.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout();
        self.start_line(&mut stdout)?;
        execute!(stdout, SetForegroundColor(Colors::DIM), Print("Sources:\n"))?;
        for citation in citations {
            execute!(stdout, Print(format!("  {}\n", citation)))?;
        }
        execute!(stdout, ResetColor)?;
        stdout.flush()?;
        self.at_line_start = true;
        Ok(())
    }

    /// Print an error message.
    pub fn print_error(&mut self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        self.start_line(&mut stdout)?;
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        self.at_line_start = true;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&mut self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        self.start_line(&mut stdout)?;
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        self.at_line_start = true;
        Ok(())
    }

    fn start_line(&mut self, stdout: &mut io::Stdout) -> Result<()> {
        if !self.at_line_start {
            execute!(stdout, Print("\n"))?;
            self.at_line_start = true;
        }
        Ok(())
    }
}
