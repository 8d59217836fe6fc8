//! Dialer
//!
//! The user-facing flow around one call: place it through the relay server,
//! listen to it, and push control messages into it. Every outcome the user must
//! see goes through a [`Notifier`]; everything else is only logged.

use crate::audio::session::{RelaySession, SessionError};
use crate::control::{CallControlClient, CallLinks, ControlError};

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

const START_FAILED: &str = "Could not start listening to the call. Check console logs.";
const CALL_ANSWERED: &str = "Call answered! Listen URL is ready.";
const INITIATE_FAILED: &str = "An error occurred while initiating the call.";
const EMPTY_MESSAGE: &str = "Please enter a message to send.";
const CONTROL_SENT: &str = "Control message sent successfully.";
const CONTROL_FAILED: &str = "An error occurred while sending the control message.";

/// Blocking, user-visible messages.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

/// Prints alerts to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn alert(&self, message: &str) {
        info!(alert = message);
        println!("{}", message);
    }
}

/// What the dialer currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerView {
    pub dial_form_visible: bool,
    pub live_listening_visible: bool,
    pub call_controls_visible: bool,
    pub listen_url: Option<String>,
    pub control_url: Option<String>,
}

impl Default for DialerView {
    fn default() -> Self {
        Self {
            dial_form_visible: true,
            live_listening_visible: false,
            call_controls_visible: false,
            listen_url: None,
            control_url: None,
        }
    }
}

impl DialerView {
    pub fn control_target(&self) -> Option<&str> {
        self.control_url.as_deref().or(self.listen_url.as_deref())
    }
}

pub struct Dialer {
    client: CallControlClient,
    session: RelaySession,
    notifier: Arc<dyn Notifier>,
    view: Mutex<DialerView>,
}

impl Dialer {
    pub fn new(client: CallControlClient, session: RelaySession, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            session,
            notifier,
            view: Mutex::new(DialerView::default()),
        }
    }

    pub fn view(&self) -> DialerView {
        self.view.lock().clone()
    }

    pub fn session(&self) -> &RelaySession {
        &self.session
    }

    /// Open the dialer at `page_url`.
    ///
    /// A `listenUrl` query parameter switches to listen-only mode: the dial form
    /// is hidden and relaying starts immediately. Returns whether that happened.
    pub async fn launch(&self, page_url: &str) -> bool {
        let Some(listen_url) = listen_url_param(page_url) else {
            return false;
        };

        info!("Auto-starting audio for listenUrl: {}", listen_url);
        self.listen_only(&listen_url).await;
        true
    }

    /// Hide the dial form and relay `listen_url` straight away.
    pub async fn listen_only(&self, listen_url: &str) -> bool {
        {
            let mut view = self.view.lock();
            view.dial_form_visible = false;
            view.listen_url = Some(listen_url.to_string());
        }

        self.start_session(listen_url).await
    }

    /// Place a call and bind its URLs for listening and control.
    pub async fn submit_call(&self, phone_number: &str, customer_name: &str) -> Option<CallLinks> {
        match self.client.initiate_call(phone_number, customer_name).await {
            Ok(links) => {
                {
                    let mut view = self.view.lock();
                    view.live_listening_visible = true;
                    view.call_controls_visible = true;
                    view.listen_url = Some(links.listen_url.clone());
                    view.control_url = links.control_url.clone();
                }
                info!(call_id = ?links.call_id, "Listen URL: {}", links.listen_url);
                self.notifier.alert(CALL_ANSWERED);
                Some(links)
            }
            Err(ControlError::Transport(e)) => {
                error!("Error initiating call: {}", e);
                self.notifier.alert(INITIATE_FAILED);
                None
            }
            Err(e) => {
                self.notifier.alert(&format!("Error initiating call: {}", e));
                None
            }
        }
    }

    /// Start relaying the bound listen URL.
    pub async fn start_listening(&self) -> bool {
        let listen_url = self.view.lock().listen_url.clone();
        match listen_url {
            Some(url) => self.start_session(&url).await,
            None => {
                warn!("No listen URL bound; place a call first");
                false
            }
        }
    }

    pub async fn stop_listening(&self) {
        self.session.stop().await;
    }

    /// Send a control message to the current call.
    pub async fn send_control(&self, control_type: Option<&str>, message: &str) -> bool {
        if message.is_empty() {
            self.notifier.alert(EMPTY_MESSAGE);
            return false;
        }

        let target = { self.view.lock().control_target().map(str::to_string) };
        let Some(target) = target else {
            self.notifier
                .alert("Failed to send control message: No call in progress.");
            return false;
        };

        match self.client.send_control(&target, control_type, message).await {
            Ok(_) => {
                self.notifier.alert(CONTROL_SENT);
                true
            }
            Err(ControlError::Transport(e)) => {
                error!("Error sending control message: {}", e);
                self.notifier.alert(CONTROL_FAILED);
                false
            }
            Err(e) => {
                self.notifier
                    .alert(&format!("Failed to send control message: {}", e));
                false
            }
        }
    }

    async fn start_session(&self, listen_url: &str) -> bool {
        match self.session.start(listen_url).await {
            Ok(_) => true,
            // Already logged by the session; the running session keeps playing.
            Err(SessionError::AlreadyActive) => false,
            Err(SessionError::Cancelled) => false,
            Err(e) => {
                error!("Error starting audio: {}", e);
                self.notifier.alert(START_FAILED);
                false
            }
        }
    }
}

/// The `listenUrl` query parameter of `page_url`, if present and non-empty.
pub fn listen_url_param(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "listenUrl")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::testing::{OutputLog, RecordingOutput};
    use crate::audio::playback::PlaybackFormat;
    use crate::audio::session::SessionState;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        alerts: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        fn alerts(&self) -> Vec<String> {
            self.alerts.lock().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, message: &str) {
            self.alerts.lock().push(message.to_string());
        }
    }

    fn dialer(server_url: &str, log: OutputLog) -> (Dialer, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let session = RelaySession::new(
            Box::new(RecordingOutput::new(log)),
            PlaybackFormat::default(),
        );
        let dialer = Dialer::new(
            CallControlClient::new(server_url),
            session,
            Arc::new(notifier.clone()),
        );
        (dialer, notifier)
    }

    async fn holding_feed() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        format!("ws://{}", addr)
    }

    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[test]
    fn test_listen_url_param() {
        assert_eq!(
            listen_url_param("http://localhost/?listenUrl=wss%3A%2F%2Fx%2Fy"),
            Some("wss://x/y".to_string())
        );
        assert_eq!(listen_url_param("http://localhost/?listenUrl="), None);
        assert_eq!(listen_url_param("http://localhost/"), None);
        assert_eq!(listen_url_param("not a url"), None);
    }

    #[tokio::test]
    async fn test_submit_call_binds_listen_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initiate-call"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "listenUrl": "wss://x/y"})),
            )
            .mount(&server)
            .await;

        let (dialer, notifier) = dialer(&server.uri(), OutputLog::default());
        let links = dialer.submit_call("+15551234567", "Jane").await;

        assert!(links.is_some());
        let view = dialer.view();
        assert!(view.live_listening_visible);
        assert!(view.call_controls_visible);
        assert_eq!(view.listen_url.as_deref(), Some("wss://x/y"));
        assert_eq!(view.control_target(), Some("wss://x/y"));
        assert_eq!(notifier.alerts(), vec![CALL_ANSWERED.to_string()]);
    }

    #[tokio::test]
    async fn test_submit_call_failure_alerts_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initiate-call"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "error": "Invalid Key"})),
            )
            .mount(&server)
            .await;

        let (dialer, notifier) = dialer(&server.uri(), OutputLog::default());
        assert!(dialer.submit_call("+15551234567", "Jane").await.is_none());

        assert_eq!(notifier.alerts(), vec!["Error initiating call: Invalid Key".to_string()]);
        assert!(!dialer.view().live_listening_visible);
    }

    #[tokio::test]
    async fn test_empty_control_message_is_rejected() {
        let server = MockServer::start().await;
        let (dialer, notifier) = dialer(&server.uri(), OutputLog::default());

        assert!(!dialer.send_control(None, "").await);
        assert_eq!(notifier.alerts(), vec![EMPTY_MESSAGE.to_string()]);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_control_prefers_control_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initiate-call"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "listenUrl": "wss://x/listen",
                "controlUrl": "https://x/control"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/control-call"))
            .and(wiremock::matchers::body_partial_json(
                json!({"controlUrl": "https://x/control", "message": "hi"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let (dialer, notifier) = dialer(&server.uri(), OutputLog::default());
        dialer.submit_call("+15551234567", "Jane").await;

        assert!(dialer.send_control(Some("say"), "hi").await);
        assert_eq!(notifier.alerts().last().map(String::as_str), Some(CONTROL_SENT));
    }

    #[tokio::test]
    async fn test_launch_with_listen_url_starts_session() {
        let feed = holding_feed().await;
        let log = OutputLog::default();
        let (dialer, notifier) = dialer("http://127.0.0.1:1", log.clone());

        let page = Url::parse_with_params("http://localhost/", &[("listenUrl", feed.as_str())]).unwrap();
        assert!(dialer.launch(page.as_str()).await);

        assert!(!dialer.view().dial_form_visible);
        assert_eq!(dialer.session().state(), SessionState::Active);
        assert!(notifier.alerts().is_empty());

        dialer.stop_listening().await;
        assert_eq!(dialer.session().state(), SessionState::Idle);
        assert_eq!(log.count("close"), 1);
    }

    #[tokio::test]
    async fn test_launch_start_failure_alerts() {
        let feed = refused_url().await;
        let (dialer, notifier) = dialer("http://127.0.0.1:1", OutputLog::default());

        let page = Url::parse_with_params("http://localhost/", &[("listenUrl", feed.as_str())]).unwrap();
        assert!(dialer.launch(page.as_str()).await);

        assert_eq!(notifier.alerts(), vec![START_FAILED.to_string()]);
        assert_eq!(dialer.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_launch_without_param_keeps_dialer_mode() {
        let (dialer, _) = dialer("http://127.0.0.1:1", OutputLog::default());
        assert!(!dialer.launch("http://localhost/").await);
        assert!(dialer.view().dial_form_visible);
    }
}
