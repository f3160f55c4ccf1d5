//! Manual personalization dialogs on a terminal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tillpoint_personalization::types::DeviceDefinition;
use tillpoint_personalization::{
    DeviceSelection, ManualEntryPrompt, PersonalizationConfigResponse, ServerAddress,
};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin,
    Stdout,
};
use tokio::sync::Mutex;

/// Answer that dismisses a dialog.
const QUIT: &str = "q";

/// Reads dialog answers line by line and writes questions to a terminal.
///
/// An empty answer keeps the suggested value, `q` or end of input dismisses
/// the dialog.
pub struct ConsolePrompt<R = BufReader<Stdin>, W = Stdout> {
    io: Mutex<(Lines<R>, W)>,
}

impl ConsolePrompt {
    /// Prompt on the process's standard input and output.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> ConsolePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Prompt on `reader` and `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader.lines(), writer)),
        }
    }

    /// Print `text` and read one trimmed answer; `None` dismisses.
    async fn ask(&self, text: &str) -> Option<String> {
        let mut io = self.io.lock().await;
        let (lines, writer) = &mut *io;
        if let Err(e) = write_all(writer, text).await {
            tracing::warn!(error = %e, "Failed to write prompt");
            return None;
        }
        match lines.next_line().await {
            Ok(Some(line)) => {
                let answer = line.trim().to_string();
                (answer != QUIT).then_some(answer)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read answer");
                None
            }
        }
    }

    /// Consume the prompt, returning what was written.
    pub fn into_writer(self) -> W {
        self.io.into_inner().1
    }
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

/// Parse `[http://|https://]host[:port]`, falling back to `current` for
/// omitted parts. An empty answer keeps `current`.
fn parse_address(answer: &str, current: &ServerAddress) -> Option<ServerAddress> {
    if answer.is_empty() {
        return (!current.server_name.is_empty()).then(|| current.clone());
    }
    let (ssl_enabled, rest) = if let Some(rest) = answer.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = answer.strip_prefix("http://") {
        (false, rest)
    } else {
        (current.ssl_enabled, answer)
    };
    let rest = rest.trim_end_matches('/');
    let (server_name, server_port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (rest, current.server_port),
    };
    if server_name.is_empty() {
        return None;
    }
    Some(ServerAddress {
        server_name: server_name.to_string(),
        server_port,
        ssl_enabled,
    })
}

fn describe(device: &DeviceDefinition) -> String {
    match &device.description {
        Some(description) => format!("{} ({}) - {description}", device.device_id, device.app_id),
        None => format!("{} ({})", device.device_id, device.app_id),
    }
}

#[async_trait]
impl<R, W> ManualEntryPrompt for ConsolePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn server_address(
        &self,
        current: &ServerAddress,
        error: Option<&str>,
    ) -> Option<ServerAddress> {
        let mut question = String::new();
        if let Some(error) = error {
            question.push_str(&format!("Personalization failed: {error}\n"));
        }
        let suggestion = if current.server_name.is_empty() {
            String::new()
        } else {
            format!(" [{}:{}]", current.server_name, current.server_port)
        };
        question.push_str(&format!("Server address{suggestion}: "));

        loop {
            let answer = self.ask(&question).await?;
            if let Some(address) = parse_address(&answer, current) {
                return Some(address);
            }
            question = "Enter host[:port], or q to cancel: ".to_string();
        }
    }

    async fn select_device(
        &self,
        config: &PersonalizationConfigResponse,
    ) -> Option<DeviceSelection> {
        let devices: Vec<&DeviceDefinition> = config.devices().collect();
        let mut menu = String::from("Available devices:\n");
        for (index, device) in devices.iter().enumerate() {
            menu.push_str(&format!("  {}. {}\n", index + 1, describe(device)));
        }
        menu.push_str("Device number: ");

        let device = loop {
            let answer = self.ask(&menu).await?;
            let chosen = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| devices.get(i));
            if let Some(device) = chosen {
                break *device;
            }
            menu = format!("Enter a number from 1 to {}, or q to cancel: ", devices.len());
        };

        let mut properties = BTreeMap::new();
        for param in &device.parameters {
            let label = param.display_name.as_deref().unwrap_or(&param.param_name);
            let default = param.default_value.clone().unwrap_or_default();
            let mut question = format!("{label} [{default}]: ");
            let value = loop {
                let answer = self.ask(&question).await?;
                let value = if answer.is_empty() { default.clone() } else { answer };
                if !(param.required && value.is_empty()) {
                    break value;
                }
                question = format!("{label} is required: ");
            };
            properties.insert(param.param_name.clone(), value);
        }

        Some(DeviceSelection {
            device_id: device.device_id.clone(),
            app_id: device.app_id.clone(),
            properties,
        })
    }
}
