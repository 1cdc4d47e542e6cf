//! Session orchestration.
//!
//! A [`Session`] owns the annotation list, the viewport and the active
//! document for one live consultation. It wires pointer input to the
//! transport, applies remote events, and tracks registry requests with
//! tickets so results arriving after exit are ignored.

mod selection;

pub use selection::{DocumentSelection, RemoteOutcome, SelectTicket};

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use kurbo::Size;
use thiserror::Error;

use crate::annotation::AnnotationList;
use crate::config::{ConfigError, SessionConfig};
use crate::document::{Document, UploadFile};
use crate::geometry::SurfaceGeometry;
use crate::input::{Gesture, InputTranslator, PointerEvent, ToolKind};
use crate::protocol::{DocumentChange, Message, ParticipantId, Presence};
use crate::registry::{DocumentRegistry, RegistryError, SelectRequest};
use crate::transport::{
    ConnectionState, Connector, Transport, TransportError, TransportOptions, TransportStatus,
    TungsteniteConnector,
};
use crate::viewport::{ViewportState, ZOOM_IN_FACTOR, ZOOM_OUT_FACTOR};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Session has ended")]
    Ended,
}

/// Something the UI should surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Remote or transport error.
    Error(String),
    ParticipantJoined(Presence),
    ParticipantLeft(Presence),
    /// The active document switched.
    DocumentChanged { document_id: String, by: ParticipantId },
    /// A pending local selection was confirmed by the server.
    SelectionConfirmed { document_id: String },
    /// A local selection failed and the previous document was restored.
    SelectionReverted { document_id: String, reason: String },
    /// No confirmation arrived in time; the local choice was kept.
    SelectionUnconfirmed { document_id: String },
    DocumentsUpdated { count: usize },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    /// Reconnection gave up; the session must be re-entered.
    ConnectionLost,
}

/// Ties a registry request to the session instance that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    epoch: u64,
}

struct SessionState {
    local_id: ParticipantId,
    annotations: AnnotationList,
    viewport: ViewportState,
    geometry: SurfaceGeometry,
    selection: DocumentSelection,
    catalog: Vec<Document>,
    participants: BTreeMap<ParticipantId, Option<String>>,
    notices: Vec<SessionNotice>,
    needs_redraw: bool,
}

impl SessionState {
    fn new(local_id: ParticipantId) -> Self {
        Self {
            viewport: ViewportState::new(local_id.clone()),
            local_id,
            annotations: AnnotationList::new(),
            geometry: SurfaceGeometry::default(),
            selection: DocumentSelection::new(),
            catalog: Vec::new(),
            participants: BTreeMap::new(),
            notices: Vec::new(),
            needs_redraw: true,
        }
    }

    fn remember(&mut self, document: Document) {
        match self.catalog.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => self.catalog.push(document),
        }
    }

    /// Annotations belong to a document; a switch starts from a clean view.
    fn switch_view(&mut self) {
        self.annotations.clear();
        let local_id = self.local_id.clone();
        self.viewport.reset(&local_id);
        self.needs_redraw = true;
    }

    fn apply_remote_document(&mut self, change: &DocumentChange) {
        if let Some(document) = &change.document {
            self.remember(document.clone());
        }
        let outcome = self.selection.remote(&change.document_id);
        log::info!("Document change to {} ({:?})", change.document_id, outcome);
        if outcome == RemoteOutcome::Confirmed {
            self.notices.push(SessionNotice::SelectionConfirmed {
                document_id: change.document_id.clone(),
            });
        }
        if outcome.switched() {
            self.switch_view();
            self.notices.push(SessionNotice::DocumentChanged {
                document_id: change.document_id.clone(),
                by: change.participant_id.clone(),
            });
        }
    }

    fn apply_presence(&mut self, presence: &Presence, joined: bool) {
        if presence.participant_id == self.local_id {
            return;
        }
        if joined {
            self.participants
                .insert(presence.participant_id.clone(), presence.name.clone());
            self.notices.push(SessionNotice::ParticipantJoined(presence.clone()));
        } else {
            self.participants.remove(&presence.participant_id);
            self.notices.push(SessionNotice::ParticipantLeft(presence.clone()));
        }
    }
}

/// One participant's view of a live session.
pub struct Session<C: Connector = TungsteniteConnector> {
    config: SessionConfig,
    local_id: ParticipantId,
    state: Rc<RefCell<SessionState>>,
    transport: Transport<C>,
    translator: InputTranslator,
    epoch: u64,
    active: bool,
}

impl Session<TungsteniteConnector> {
    /// Join a session over a real WebSocket.
    pub fn enter(config: SessionConfig, local_id: ParticipantId) -> Result<Self, SessionError> {
        let url = config.participant_endpoint(&local_id)?;
        let transport = Transport::new(url, config.token.clone(), TransportOptions::from(&config))?;
        Self::start(config, local_id, transport)
    }
}

impl<C: Connector> Session<C> {
    /// Join a session through a custom connector.
    pub fn enter_with(config: SessionConfig, local_id: ParticipantId, connector: C) -> Result<Self, SessionError> {
        let url = config.participant_endpoint(&local_id)?;
        let transport =
            Transport::with_connector(connector, url, config.token.clone(), TransportOptions::from(&config));
        Self::start(config, local_id, transport)
    }

    fn start(config: SessionConfig, local_id: ParticipantId, mut transport: Transport<C>) -> Result<Self, SessionError> {
        let state = Rc::new(RefCell::new(SessionState::new(local_id.clone())));
        register_listeners(&mut transport, &state);
        transport.connect()?;
        log::info!("Entered session {} as {}", config.session_id, local_id);

        Ok(Self {
            translator: InputTranslator::new(local_id.clone()),
            config,
            local_id,
            state,
            transport,
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            active: true,
        })
    }

    /// Leave the session. Safe to call repeatedly.
    pub fn exit(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.transport.disconnect();
        let mut state = self.state.borrow_mut();
        state.annotations.clear();
        state.participants.clear();
        state.selection.reset();
        state.notices.clear();
        log::info!("Left session {}", self.config.session_id);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Update the rendering surface and natural document size.
    pub fn set_surface(&mut self, container: Size, image: Option<Size>) {
        let mut state = self.state.borrow_mut();
        state.geometry = SurfaceGeometry::new(container, image);
        state.needs_redraw = true;
    }

    pub fn set_tool(&mut self, tool: ToolKind) {
        self.translator.set_tool(tool);
    }

    pub fn tool(&self) -> ToolKind {
        self.translator.tool()
    }

    pub fn set_stroke_color(&mut self, color: impl Into<String>) {
        self.translator.set_color(color);
    }

    pub fn set_stroke_width(&mut self, width: f64) {
        self.translator.set_width(width);
    }

    /// Feed pointer input. Returns whether it produced an event.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> bool {
        if !self.active {
            return false;
        }
        let (geometry, viewport) = {
            let state = self.state.borrow();
            (state.geometry, state.viewport.clone())
        };
        match self.translator.handle(event, &geometry, &viewport) {
            Some(gesture) => {
                self.apply_local(gesture);
                true
            }
            None => false,
        }
    }

    pub fn zoom_in(&mut self) {
        self.zoom(ZOOM_IN_FACTOR);
    }

    pub fn zoom_out(&mut self) {
        self.zoom(ZOOM_OUT_FACTOR);
    }

    fn zoom(&mut self, factor: f64) {
        if !self.active {
            return;
        }
        let gesture = self.translator.zoom(&self.state.borrow().viewport, factor);
        self.apply_local(gesture);
    }

    /// Clear every annotation for all participants.
    pub fn clear(&mut self) {
        if !self.active {
            return;
        }
        let gesture = self.translator.clear();
        self.apply_local(gesture);
    }

    fn apply_local(&mut self, gesture: Gesture) {
        let message = {
            let mut state = self.state.borrow_mut();
            state.needs_redraw = true;
            match gesture {
                Gesture::Stroke { event, .. } => {
                    state.annotations.apply(event.clone());
                    Message::Annotation(event)
                }
                Gesture::Clear(event) => {
                    state.annotations.clear();
                    Message::Annotation(event)
                }
                Gesture::Viewport(viewport) => {
                    state.viewport = viewport.clone();
                    Message::Viewport(viewport)
                }
            }
        };
        self.transport.send(&message);
    }

    /// Run listeners for everything received and expire stale selections.
    pub fn poll(&mut self) -> Vec<SessionNotice> {
        if !self.active {
            return Vec::new();
        }
        for status in self.transport.poll() {
            let notice = match status {
                TransportStatus::Reconnecting { attempt, delay } => SessionNotice::Reconnecting { attempt, delay },
                TransportStatus::Reopened => SessionNotice::Reconnected,
                TransportStatus::Lost => SessionNotice::ConnectionLost,
            };
            self.state.borrow_mut().notices.push(notice);
        }
        self.tick(Instant::now());
        std::mem::take(&mut self.state.borrow_mut().notices)
    }

    /// Expire a pending selection that was never confirmed.
    pub fn tick(&mut self, now: Instant) {
        let timeout = self.config.selection_timeout();
        let mut state = self.state.borrow_mut();
        if let Some(document_id) = state.selection.expire(now, timeout) {
            log::warn!("Selection of {} was not confirmed in {:?}", document_id, timeout);
            state.notices.push(SessionNotice::SelectionUnconfirmed { document_id });
        }
    }

    pub fn annotations(&self) -> Ref<'_, AnnotationList> {
        Ref::map(self.state.borrow(), |s| &s.annotations)
    }

    pub fn viewport(&self) -> ViewportState {
        self.state.borrow().viewport.clone()
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.state.borrow().geometry
    }

    pub fn active_document_id(&self) -> Option<String> {
        self.state.borrow().selection.active().map(str::to_string)
    }

    /// The active document, if its details are known.
    pub fn active_document(&self) -> Option<Document> {
        let state = self.state.borrow();
        let id = state.selection.active()?;
        state.catalog.iter().find(|d| d.id == id).cloned()
    }

    pub fn pending_document_id(&self) -> Option<String> {
        self.state.borrow().selection.pending().map(str::to_string)
    }

    pub fn documents(&self) -> Vec<Document> {
        self.state.borrow().catalog.clone()
    }

    pub fn participants(&self) -> Vec<Presence> {
        self.state
            .borrow()
            .participants
            .iter()
            .map(|(id, name)| Presence {
                participant_id: id.clone(),
                name: name.clone(),
            })
            .collect()
    }

    /// Whether a full redraw is due. Resets the flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.state.borrow_mut().needs_redraw)
    }

    pub fn request_ticket(&self) -> RequestTicket {
        RequestTicket { epoch: self.epoch }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.active && epoch == self.epoch
    }

    /// Apply a document listing. Returns `false` if the ticket is stale.
    pub fn apply_document_list(&mut self, ticket: RequestTicket, result: Result<Vec<Document>, RegistryError>) -> bool {
        if !self.is_current(ticket.epoch) {
            log::debug!("Ignoring document list for an ended session");
            return false;
        }
        let mut state = self.state.borrow_mut();
        match result {
            Ok(documents) => {
                let count = documents.len();
                for document in documents {
                    state.remember(document);
                }
                state.notices.push(SessionNotice::DocumentsUpdated { count });
            }
            Err(e) => {
                log::error!("Listing documents failed: {}", e);
                state.notices.push(SessionNotice::Error(e.to_string()));
            }
        }
        true
    }

    /// Register an uploaded document. Returns `false` if the ticket is stale.
    pub fn apply_upload(&mut self, ticket: RequestTicket, result: Result<Document, RegistryError>) -> bool {
        if !self.is_current(ticket.epoch) {
            return false;
        }
        let mut state = self.state.borrow_mut();
        match result {
            Ok(document) => {
                state.remember(document);
                let count = state.catalog.len();
                state.notices.push(SessionNotice::DocumentsUpdated { count });
            }
            Err(e) => state.notices.push(SessionNotice::Error(e.to_string())),
        }
        true
    }

    /// Show `document` right away while the selection request is in flight.
    pub fn begin_select(&mut self, document: Document) -> SelectTicket {
        let mut state = self.state.borrow_mut();
        let document_id = document.id.clone();
        state.remember(document);
        let (seq, changed) = state.selection.begin(document_id.clone(), Instant::now());
        if changed {
            state.switch_view();
        }
        SelectTicket::new(self.epoch, seq, document_id)
    }

    /// Settle a selection request. Returns `false` if the ticket is stale.
    pub fn finish_select(&mut self, ticket: &SelectTicket, result: Result<(), RegistryError>) -> bool {
        if !self.is_current(ticket.epoch) {
            log::debug!("Ignoring selection result for an ended session");
            return false;
        }
        let Err(e) = result else {
            return true;
        };
        let mut state = self.state.borrow_mut();
        if let Some(restored) = state.selection.fail(ticket.seq) {
            log::warn!("Selecting {} failed, restoring {:?}: {}", ticket.document_id(), restored, e);
            state.switch_view();
            state.notices.push(SessionNotice::SelectionReverted {
                document_id: ticket.document_id().to_string(),
                reason: e.to_string(),
            });
        }
        true
    }

    /// List the session's documents through `registry`.
    pub async fn refresh_documents<R>(&mut self, registry: &R) -> Result<(), SessionError>
    where
        R: DocumentRegistry + ?Sized,
    {
        if !self.active {
            return Err(SessionError::Ended);
        }
        let ticket = self.request_ticket();
        let result = registry.list(&self.config.session_id).await;
        self.apply_document_list(ticket, result);
        Ok(())
    }

    /// Select `document` as the shared one through `registry`.
    pub async fn select_document<R>(&mut self, registry: &R, document: Document) -> Result<(), SessionError>
    where
        R: DocumentRegistry + ?Sized,
    {
        if !self.active {
            return Err(SessionError::Ended);
        }
        let request = SelectRequest::new(document.id.clone()).by(self.local_id.clone());
        let ticket = self.begin_select(document);
        let result = registry.select(&self.config.session_id, &request).await;
        self.finish_select(&ticket, result);
        Ok(())
    }

    /// Upload `file` through `registry` and add it to the catalog.
    ///
    /// Rejected files fail immediately with [`RegistryError::Rejected`].
    pub async fn upload<R>(&mut self, registry: &R, file: UploadFile) -> Result<Document, SessionError>
    where
        R: DocumentRegistry + ?Sized,
    {
        if !self.active {
            return Err(SessionError::Ended);
        }
        let ticket = self.request_ticket();
        let document = registry.upload(&self.config.session_id, file).await?;
        self.apply_upload(ticket, Ok(document.clone()));
        Ok(document)
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.exit();
    }
}

fn register_listeners<C: Connector>(transport: &mut Transport<C>, state: &Rc<RefCell<SessionState>>) {
    let s = state.clone();
    transport.on_annotation(move |event| {
        let mut state = s.borrow_mut();
        if event.participant_id == state.local_id {
            log::trace!("Ignoring own annotation echo");
            return;
        }
        state.annotations.apply(event.clone());
        state.needs_redraw = true;
    });

    let s = state.clone();
    transport.on_viewport(move |viewport| {
        let mut state = s.borrow_mut();
        if viewport.participant_id == state.local_id {
            log::trace!("Ignoring own viewport echo");
            return;
        }
        state.viewport = viewport.clone().sanitized();
        state.needs_redraw = true;
    });

    let s = state.clone();
    transport.on_document_changed(move |change| s.borrow_mut().apply_remote_document(change));

    let s = state.clone();
    transport.on_presence(move |presence, joined| s.borrow_mut().apply_presence(presence, joined));

    let s = state.clone();
    transport.on_error(move |payload| {
        log::warn!("Session error: {}", payload.message);
        s.borrow_mut().notices.push(SessionNotice::Error(payload.message.clone()));
    });
}
