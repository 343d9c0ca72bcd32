//! OBS WebSocket v5 scene controller.
//!
//! Blocking client over a plain TCP socket. Connect, read and write are all
//! bounded by the endpoint timeout; any transport failure drops the socket so
//! the next request starts a fresh session.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tungstenite::{Message, WebSocket};

use super::{SceneController, SceneError};

const RPC_VERSION: u32 = 1;
const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;

/// Frames read while waiting for one response before giving up.
const MAX_FRAMES_PER_RESPONSE: usize = 256;

const MEDIA_ACTION_STOP: &str = "OBS_WEBSOCKET_MEDIA_INPUT_ACTION_STOP";

#[derive(Clone, Debug)]
pub struct ObsEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub timeout: Duration,
}

impl ObsEndpoint {
    fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    op: u8,
    #[serde(default)]
    d: Value,
}

#[derive(Debug, Deserialize)]
struct Hello {
    authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
struct AuthChallenge {
    challenge: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    request_type: String,
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Value,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    result: bool,
    code: i64,
    #[serde(default)]
    comment: Option<String>,
}

/// Answer to the OBS v5 authentication challenge:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn obs_auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

fn encode_request(request_type: &str, request_id: &str, data: Value) -> String {
    json!({
        "op": OP_REQUEST,
        "d": {
            "requestType": request_type,
            "requestId": request_id,
            "requestData": data,
        }
    })
    .to_string()
}

fn identify_message(hello: &Hello, password: &str) -> String {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": 0,
    });
    if let Some(auth) = &hello.authentication {
        d["authentication"] = Value::String(obs_auth_response(password, &auth.salt, &auth.challenge));
    }
    json!({ "op": OP_IDENTIFY, "d": d }).to_string()
}

fn program_scene_name(data: &Value) -> Option<String> {
    data.get("currentProgramSceneName")
        .or_else(|| data.get("sceneName"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// OBS WebSocket v5 client implementing [`SceneController`].
pub struct ObsSceneController {
    endpoint: ObsEndpoint,
    socket: Option<WebSocket<TcpStream>>,
    next_request_id: u64,
}

impl std::fmt::Debug for ObsSceneController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObsSceneController")
            .field("url", &self.endpoint.url())
            .field("connected", &self.socket.is_some())
            .finish()
    }
}

impl ObsSceneController {
    pub fn new(endpoint: ObsEndpoint) -> Self {
        Self {
            endpoint,
            socket: None,
            next_request_id: 0,
        }
    }

    fn connect(&self) -> Result<WebSocket<TcpStream>, SceneError> {
        let timeout = self.endpoint.timeout;
        let addr = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| connection(format!("resolve {}: {}", self.endpoint.host, e)))?
            .next()
            .ok_or_else(|| connection(format!("no address for {}", self.endpoint.host)))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| connection(format!("connect {}: {}", addr, e)))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| connection(format!("socket setup: {}", e)))?;
        let _ = stream.set_nodelay(true);

        let (mut socket, _response) = tungstenite::client(self.endpoint.url(), stream)
            .map_err(|e| connection(format!("websocket handshake: {}", e)))?;

        let hello = read_envelope(&mut socket, OP_HELLO)?;
        let hello: Hello = serde_json::from_value(hello.d)
            .map_err(|e| connection(format!("malformed Hello: {}", e)))?;
        socket
            .send(Message::Text(identify_message(&hello, &self.endpoint.password)))
            .map_err(|e| connection(format!("send Identify: {}", e)))?;
        read_envelope(&mut socket, OP_IDENTIFIED)?;
        log::info!("connected to composer at {}", self.endpoint.url());
        Ok(socket)
    }

    fn request(&mut self, request_type: &str, data: Value) -> Result<Value, SceneError> {
        if self.socket.is_none() {
            self.socket = Some(self.connect()?);
        }
        self.next_request_id += 1;
        let request_id = self.next_request_id.to_string();
        let outcome = match self.socket.as_mut() {
            Some(socket) => exchange(socket, request_type, &request_id, data),
            None => Err(connection("not connected".to_string())),
        };
        if matches!(outcome, Err(SceneError::Connection(_))) {
            self.socket = None;
        }
        outcome
    }
}

fn exchange(
    socket: &mut WebSocket<TcpStream>,
    request_type: &str,
    request_id: &str,
    data: Value,
) -> Result<Value, SceneError> {
    socket
        .send(Message::Text(encode_request(request_type, request_id, data)))
        .map_err(|e| connection(format!("send {}: {}", request_type, e)))?;
    for _ in 0..MAX_FRAMES_PER_RESPONSE {
        let envelope = read_any_envelope(socket)?;
        if envelope.op != OP_REQUEST_RESPONSE {
            continue;
        }
        let response: RequestResponse = serde_json::from_value(envelope.d)
            .map_err(|e| connection(format!("malformed response: {}", e)))?;
        if response.request_id != request_id {
            continue;
        }
        if !response.request_status.result {
            return Err(SceneError::Rejected {
                request: response.request_type,
                code: response.request_status.code,
                comment: response.request_status.comment.unwrap_or_default(),
            });
        }
        return Ok(response.response_data);
    }
    Err(connection(format!("no response to {}", request_type)))
}

fn read_envelope(socket: &mut WebSocket<TcpStream>, op: u8) -> Result<Envelope, SceneError> {
    let envelope = read_any_envelope(socket)?;
    if envelope.op != op {
        return Err(connection(format!(
            "expected op {} from composer, got {}",
            op, envelope.op
        )));
    }
    Ok(envelope)
}

fn read_any_envelope(socket: &mut WebSocket<TcpStream>) -> Result<Envelope, SceneError> {
    loop {
        let message = socket.read().map_err(|e| connection(format!("read: {}", e)))?;
        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text)
                    .map_err(|e| connection(format!("malformed message: {}", e)));
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no reason".to_string());
                return Err(connection(format!("composer closed the session: {}", reason)));
            }
            _ => continue,
        }
    }
}

fn connection(message: String) -> SceneError {
    SceneError::Connection(message)
}

impl SceneController for ObsSceneController {
    fn set_scene(&mut self, name: &str) -> Result<(), SceneError> {
        self.request("SetCurrentProgramScene", json!({ "sceneName": name }))?;
        Ok(())
    }

    fn current_scene(&mut self) -> Result<String, SceneError> {
        let data = self.request("GetCurrentProgramScene", json!({}))?;
        program_scene_name(&data)
            .ok_or_else(|| connection("GetCurrentProgramScene returned no scene name".to_string()))
    }

    fn set_media_file(&mut self, input: &str, path: &str) -> Result<(), SceneError> {
        // Clearing first forces OBS to reopen the file even if the path repeats.
        for local_file in ["", path] {
            self.request(
                "SetInputSettings",
                json!({
                    "inputName": input,
                    "inputSettings": { "local_file": local_file },
                    "overlay": true,
                }),
            )?;
        }
        Ok(())
    }

    fn stop_media(&mut self, input: &str) -> Result<(), SceneError> {
        self.request(
            "TriggerMediaInputAction",
            json!({ "inputName": input, "mediaAction": MEDIA_ACTION_STOP }),
        )?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_matches_reference_vector() {
        // Reference values from the obs-websocket 5.x protocol documentation.
        let auth = obs_auth_response(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        );
        assert_eq!(auth, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn request_envelope_shape() {
        let raw = encode_request("SetCurrentProgramScene", "7", json!({ "sceneName": "Alert" }));
        let value: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["op"], 6);
        assert_eq!(value["d"]["requestType"], "SetCurrentProgramScene");
        assert_eq!(value["d"]["requestId"], "7");
        assert_eq!(value["d"]["requestData"]["sceneName"], "Alert");
    }

    #[test]
    fn identify_includes_auth_only_when_challenged() {
        let open: Hello = serde_json::from_value(json!({ "rpcVersion": 1 })).expect("hello");
        let msg: Value = serde_json::from_str(&identify_message(&open, "pw")).expect("json");
        assert_eq!(msg["op"], 1);
        assert!(msg["d"].get("authentication").is_none());

        let locked: Hello = serde_json::from_value(json!({
            "rpcVersion": 1,
            "authentication": { "challenge": "c", "salt": "s" }
        }))
        .expect("hello");
        let msg: Value = serde_json::from_str(&identify_message(&locked, "pw")).expect("json");
        assert_eq!(msg["d"]["authentication"], obs_auth_response("pw", "s", "c"));
    }

    #[test]
    fn program_scene_name_reads_both_field_spellings() {
        assert_eq!(
            program_scene_name(&json!({ "currentProgramSceneName": "Standby" })),
            Some("Standby".to_string())
        );
        assert_eq!(
            program_scene_name(&json!({ "sceneName": "Alert", "sceneUuid": "x" })),
            Some("Alert".to_string())
        );
        assert_eq!(program_scene_name(&json!({})), None);
    }

    #[test]
    fn unreachable_composer_is_a_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let mut controller = ObsSceneController::new(ObsEndpoint {
            host: "127.0.0.1".to_string(),
            port,
            password: String::new(),
            timeout: Duration::from_millis(500),
        });
        let err = controller.set_scene("Standby").expect_err("nothing listening");
        assert!(err.is_connection());
    }
}
