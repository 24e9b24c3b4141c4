use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::canvas::{CanvasLayout, MaskBuffer, edit_dimensions};
use crate::components::tools::{
    BrushSettings, DrawCommand, PointerEvent, StrokeState, Tool, TouchEvent, dispatch,
};
use crate::error::MaskError;
use crate::io::{CompressedMask, DisplayMask};
use crate::ops::brush::{BrushShape, PreviewOverlay, stamp};
use crate::ops::codec::{decode_for_editing, encode_compressed, encode_display, upscale_for_display};
use crate::ops::jobs::{JobOutput, JobResult, JobTicket, MaskJobQueue};
use crate::ops::transform::{BiasState, realign_mask};
use crate::settings::MaskSettings;
use crate::{log_err, log_info, log_warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
    Editing,
    Saved,
    Deleted,
    Cancelled,
}

impl SessionState {
    /// Open or Editing: the buffer accepts strokes.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::Editing)
    }
}

/// Everything needed to open an editor on one generation target.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    pub target_w: u32,
    pub target_h: u32,
    /// Previously saved mask to continue editing.
    pub existing: Option<CompressedMask>,
    /// Mask the pipeline falls back to when the user deletes theirs.
    pub pipeline_default: Option<CompressedMask>,
}

impl OpenRequest {
    pub fn new(target_w: u32, target_h: u32) -> Self {
        Self {
            target_w,
            target_h,
            existing: None,
            pipeline_default: None,
        }
    }

    pub fn with_existing(mut self, mask: CompressedMask) -> Self {
        self.existing = Some(mask);
        self
    }

    pub fn with_pipeline_default(mut self, mask: CompressedMask) -> Self {
        self.pipeline_default = Some(mask);
        self
    }

    /// The mask in effect when the editor opens: the user's own, else the
    /// pipeline default.
    pub fn initial_mask(&self) -> Option<&CompressedMask> {
        self.existing.as_ref().or(self.pipeline_default.as_ref())
    }
}

/// The pair published on save. Both are derived from the same edit buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskOutput {
    pub compressed: CompressedMask,
    pub display: DisplayMask,
}

impl MaskOutput {
    /// Build the pair from a compressed mask alone.
    pub fn from_compressed(compressed: CompressedMask, target_w: u32, target_h: u32) -> Result<Self, MaskError> {
        let compressed = fit_to_target(compressed, target_w, target_h)?;
        let display = upscale_for_display(&compressed, target_w, target_h)?;
        Ok(Self { compressed, display })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Both outputs should be cleared.
    Cleared,
    /// The pipeline default replaces the deleted mask.
    Restored(MaskOutput),
}

/// Resample a compressed mask authored for another resolution.
fn fit_to_target(mask: CompressedMask, target_w: u32, target_h: u32) -> Result<CompressedMask, MaskError> {
    if mask.fits_target(target_w, target_h) {
        Ok(mask)
    } else {
        encode_compressed(mask.as_rgba(), target_w, target_h)
    }
}

// ============================================================================
// MASK EDITOR SESSION
// ============================================================================

/// One mask editor: owns the live buffer, the cursor preview and the stroke
/// state between `open` and `close`.
pub struct MaskEditorSession {
    id: Uuid,
    generation: u64,
    state: SessionState,
    stroke: StrokeState,
    target: (u32, u32),
    buffer: Option<MaskBuffer>,
    overlay: Option<PreviewOverlay>,
    brush: BrushSettings,
    paint_color: Rgba<u8>,
    pipeline_default: Option<CompressedMask>,
    display_scale: f32,
}

impl MaskEditorSession {
    pub fn new(settings: &MaskSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            state: SessionState::Closed,
            stroke: StrokeState::Idle,
            target: (0, 0),
            buffer: None,
            overlay: None,
            brush: settings.brush(),
            paint_color: settings.paint_rgba(),
            pipeline_default: None,
            display_scale: 0.0,
        }
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Open the editor and decode the mask in effect on the calling thread.
    ///
    /// On error the session is left as it was.
    pub fn open(&mut self, request: OpenRequest) -> Result<(), MaskError> {
        let (ew, eh) = edit_dimensions(request.target_w, request.target_h)?;
        let buffer = match request.initial_mask() {
            Some(mask) => decode_for_editing(mask, ew, eh).inspect_err(|e| {
                log_err!("Could not decode existing mask: {}", e);
            })?,
            None => MaskBuffer::new(ew, eh)?,
        };
        self.begin(&request, ew, eh)?;
        self.install_buffer(buffer);
        Ok(())
    }

    /// Open the editor and decode the existing mask on the job pool.
    ///
    /// Returns the ticket of the decode job, or `None` when there was nothing
    /// to decode and the session is ready immediately. Strokes are ignored
    /// until the decoded buffer arrives through [`Self::apply_job`].
    pub fn open_async(
        &mut self,
        request: OpenRequest,
        queue: &mut MaskJobQueue,
    ) -> Result<Option<JobTicket>, MaskError> {
        let (ew, eh) = edit_dimensions(request.target_w, request.target_h)?;
        match request.initial_mask().cloned() {
            Some(mask) => {
                self.begin(&request, ew, eh)?;
                let ticket = self.current_ticket();
                queue.spawn_decode(ticket, mask, ew, eh);
                Ok(Some(ticket))
            }
            None => {
                self.open(request)?;
                Ok(None)
            }
        }
    }

    /// Reset everything but the brush for a fresh open.
    fn begin(&mut self, request: &OpenRequest, ew: u32, eh: u32) -> Result<(), MaskError> {
        let overlay = PreviewOverlay::new(ew, eh)?;
        if self.state.is_live() {
            log_warn!("Mask editor reopened while {:?}; discarding edits", self.state);
        }
        self.generation += 1;
        self.state = SessionState::Open;
        self.stroke = StrokeState::Idle;
        self.target = (request.target_w, request.target_h);
        self.buffer = None;
        self.overlay = Some(overlay);
        self.pipeline_default = request.pipeline_default.clone();
        log_info!(
            "Mask editor opened for {}x{} (canvas {}x{})",
            request.target_w,
            request.target_h,
            ew,
            eh
        );
        Ok(())
    }

    fn install_buffer(&mut self, buffer: MaskBuffer) {
        self.brush.rescale(buffer.diagonal());
        self.buffer = Some(buffer);
    }

    /// Issue a new ticket; results of every earlier ticket become stale.
    pub fn next_ticket(&mut self) -> JobTicket {
        self.generation += 1;
        self.current_ticket()
    }

    fn current_ticket(&self) -> JobTicket {
        JobTicket {
            session: self.id,
            generation: self.generation,
        }
    }

    /// Only the most recent request of this session is accepted.
    pub fn accepts(&self, ticket: &JobTicket) -> bool {
        ticket.session == self.id && ticket.generation == self.generation
    }

    /// Fold a finished job into the session.
    ///
    /// Stale results are dropped (`Ok(None)`). A decoded buffer is installed
    /// here; save and realign outputs are handed back to the caller.
    pub fn apply_job(&mut self, result: JobResult) -> Result<Option<JobOutput>, MaskError> {
        if !self.accepts(&result.ticket) {
            log_info!(
                "Dropping stale '{}' result (generation {} != {})",
                result.description,
                result.ticket.generation,
                self.generation
            );
            return Ok(None);
        }
        let output = result.outcome.inspect_err(|e| {
            log_err!("'{}' failed: {}", result.description, e);
        })?;
        match output {
            JobOutput::Decoded(buffer) => {
                let expected = edit_dimensions(self.target.0, self.target.1)?;
                if !self.state.is_live() || buffer.dimensions() != expected {
                    log_warn!("Decoded mask no longer matches the open editor; ignored");
                    return Ok(None);
                }
                self.install_buffer(buffer);
                Ok(None)
            }
            JobOutput::Saved(_) if !self.state.is_live() => {
                log_warn!("Save finished after the editor left {:?}; ignored", self.state);
                Ok(None)
            }
            JobOutput::Saved(out) => {
                self.state = SessionState::Saved;
                Ok(Some(JobOutput::Saved(out)))
            }
            other => Ok(Some(other)),
        }
    }

    // -- Tool state -----------------------------------------------------------

    fn mark_editing(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Editing;
        }
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.brush.tool = tool;
        self.mark_editing();
    }

    pub fn toggle_tool(&mut self) {
        self.set_tool(self.brush.tool.toggled());
    }

    pub fn set_shape(&mut self, shape: BrushShape) {
        self.brush.shape = shape;
        self.mark_editing();
    }

    /// Absolute size on the current canvas; the relative size follows.
    pub fn set_brush_size(&mut self, size: u32) {
        let diagonal = self.buffer.as_ref().map_or(0.0, |b| b.diagonal());
        self.brush.set_size(size, diagonal);
        self.mark_editing();
    }

    // -- Input ----------------------------------------------------------------

    /// Feed one pointer event. Without a live buffer this does nothing.
    pub fn handle_pointer(&mut self, event: PointerEvent, layout: &CanvasLayout) -> Vec<DrawCommand> {
        if !self.state.is_live() || self.buffer.is_none() {
            if matches!(event, PointerEvent::Down(_)) {
                log_warn!("Pointer down with no mask surface ({:?}); ignored", self.state);
            }
            return Vec::new();
        }
        self.display_scale = layout.visual_scale();
        let (next, cmds) = dispatch(self.stroke, event, layout, &self.brush);
        self.stroke = next;

        let mut stamped = false;
        for cmd in &cmds {
            match *cmd {
                DrawCommand::Stamp {
                    x,
                    y,
                    shape,
                    size,
                    erase,
                } => {
                    if let Some(buffer) = self.buffer.as_mut() {
                        stamp(buffer, shape, x, y, size, erase);
                        stamped = true;
                    }
                }
                DrawCommand::Preview {
                    x,
                    y,
                    shape,
                    size,
                    erase,
                } => {
                    if let Some(overlay) = self.overlay.as_mut() {
                        match shape {
                            BrushShape::Circle => overlay.preview_circle(x, y, size, erase),
                            BrushShape::Square => overlay.preview_square(x, y, size * 2, erase),
                        }
                    }
                }
                DrawCommand::ClearPreview => {
                    if let Some(overlay) = self.overlay.as_mut() {
                        overlay.clear();
                    }
                }
            }
        }
        if stamped {
            self.mark_editing();
        }
        cmds
    }

    pub fn handle_touch(&mut self, event: TouchEvent, layout: &CanvasLayout) -> Vec<DrawCommand> {
        self.handle_pointer(event.into(), layout)
    }

    /// Wipe the canvas without leaving the editor.
    pub fn clear(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
            self.mark_editing();
        }
    }

    /// Swap painted and unpainted on the live canvas.
    pub fn invert(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.invert();
            self.mark_editing();
        }
    }

    /// Editing form of the live buffer, painted in the session colour.
    pub fn editing_image(&self) -> Option<RgbaImage> {
        self.buffer.as_ref().map(|b| b.to_editing_rgba(self.paint_color))
    }

    // -- Outcomes -------------------------------------------------------------

    /// Encode the canvas into both wire masks. `None` when there is no live
    /// buffer to save.
    pub fn save(&mut self) -> Result<Option<MaskOutput>, MaskError> {
        let Some(editing) = self.live_editing_image() else {
            return Ok(None);
        };
        let (tw, th) = self.target;
        let compressed = encode_compressed(&editing, tw, th).inspect_err(|e| {
            log_err!("Mask save failed: {}", e);
        })?;
        let display = encode_display(&editing, tw, th).inspect_err(|e| {
            log_err!("Mask save failed: {}", e);
        })?;
        self.state = SessionState::Saved;
        self.stroke = StrokeState::Idle;
        log_info!(
            "Mask saved: {} painted cells at {}x{}",
            compressed.painted_count(),
            compressed.width(),
            compressed.height()
        );
        Ok(Some(MaskOutput { compressed, display }))
    }

    /// Queue the encode on the job pool. The session moves to `Saved` when
    /// the result is applied.
    pub fn request_save(&mut self, queue: &mut MaskJobQueue) -> Option<JobTicket> {
        let editing = self.live_editing_image()?;
        let ticket = self.next_ticket();
        queue.spawn_save(ticket, editing, self.target.0, self.target.1);
        Some(ticket)
    }

    fn live_editing_image(&self) -> Option<RgbaImage> {
        if !self.state.is_live() {
            log_warn!("Save requested while {:?}; ignored", self.state);
            return None;
        }
        let image = self.editing_image();
        if image.is_none() {
            log_warn!("Save requested before the mask surface is ready; ignored");
        }
        image
    }

    /// Clear the canvas and report what the outputs should become. Pending
    /// jobs become stale.
    pub fn delete(&mut self) -> Result<DeleteOutcome, MaskError> {
        let outcome = match self.pipeline_default.clone() {
            Some(default) => {
                let (tw, th) = self.target;
                DeleteOutcome::Restored(MaskOutput::from_compressed(default, tw, th)?)
            }
            None => DeleteOutcome::Cleared,
        };
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
        }
        self.generation += 1;
        self.state = SessionState::Deleted;
        self.stroke = StrokeState::Idle;
        log_info!(
            "Mask deleted ({})",
            match outcome {
                DeleteOutcome::Cleared => "cleared",
                DeleteOutcome::Restored(_) => "pipeline default restored",
            }
        );
        Ok(outcome)
    }

    /// Discard edits. Pending jobs become stale.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.buffer = None;
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.clear();
        }
        self.stroke = StrokeState::Idle;
        self.state = SessionState::Cancelled;
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.buffer = None;
        self.overlay = None;
        self.stroke = StrokeState::Idle;
        self.state = SessionState::Closed;
    }

    /// Copy the brush state back into persisted settings.
    pub fn store_settings(&self, settings: &mut MaskSettings) {
        settings.remember_brush(&self.brush);
    }

    // -- Accessors ------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stroke_state(&self) -> StrokeState {
        self.stroke
    }

    pub fn target(&self) -> (u32, u32) {
        self.target
    }

    pub fn buffer(&self) -> Option<&MaskBuffer> {
        self.buffer.as_ref()
    }

    pub fn overlay(&self) -> Option<&PreviewOverlay> {
        self.overlay.as_ref()
    }

    pub fn brush(&self) -> &BrushSettings {
        &self.brush
    }

    /// Screen pixels per canvas pixel at the last pointer event.
    pub fn display_scale(&self) -> f32 {
        self.display_scale
    }
}

// ============================================================================
// MASK SLOT
// ============================================================================

/// Where a generation target keeps its published masks.
///
/// The compressed mask is authoritative; the display mask is a cache
/// re-derived on demand. Failed operations leave the slot untouched.
#[derive(Clone, Debug)]
pub struct MaskSlot {
    compressed: Option<CompressedMask>,
    display: Option<DisplayMask>,
    target: (u32, u32),
}

impl MaskSlot {
    pub fn new(target_w: u32, target_h: u32) -> Result<Self, MaskError> {
        MaskError::check_dimensions(target_w, target_h)?;
        Ok(Self {
            compressed: None,
            display: None,
            target: (target_w, target_h),
        })
    }

    /// Replace both masks at once.
    pub fn commit(&mut self, output: MaskOutput) -> Result<(), MaskError> {
        let (tw, th) = self.target;
        if !output.compressed.fits_target(tw, th) || output.display.dimensions() != self.target {
            return Err(MaskError::UnsupportedMaskFormat(format!(
                "masks {:?}/{:?} do not match target {}x{}",
                output.compressed.dimensions(),
                output.display.dimensions(),
                tw,
                th
            )));
        }
        self.compressed = Some(output.compressed);
        self.display = Some(output.display);
        Ok(())
    }

    /// Store a compressed mask; the display mask is derived on next access.
    pub fn commit_compressed(&mut self, mask: CompressedMask) -> Result<(), MaskError> {
        if !mask.fits_target(self.target.0, self.target.1) {
            return Err(MaskError::UnsupportedMaskFormat(format!(
                "{}x{} mask does not match target {}x{}",
                mask.width(),
                mask.height(),
                self.target.0,
                self.target.1
            )));
        }
        self.compressed = Some(mask);
        self.display = None;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.compressed = None;
        self.display = None;
    }

    pub fn apply_delete(&mut self, outcome: DeleteOutcome) -> Result<(), MaskError> {
        match outcome {
            DeleteOutcome::Cleared => {
                self.clear();
                Ok(())
            }
            DeleteOutcome::Restored(output) => self.commit(output),
        }
    }

    pub fn target(&self) -> (u32, u32) {
        self.target
    }

    pub fn is_empty(&self) -> bool {
        self.compressed.is_none()
    }

    pub fn compressed(&self) -> Option<&CompressedMask> {
        self.compressed.as_ref()
    }

    pub fn display(&mut self) -> Result<Option<&DisplayMask>, MaskError> {
        if self.display.is_none()
            && let Some(compressed) = &self.compressed
        {
            self.display = Some(upscale_for_display(compressed, self.target.0, self.target.1)?);
        }
        Ok(self.display.as_ref())
    }

    /// Move the slot to a new target resolution, resampling the stored mask.
    pub fn retarget(&mut self, target_w: u32, target_h: u32) -> Result<(), MaskError> {
        MaskError::check_dimensions(target_w, target_h)?;
        let compressed = match &self.compressed {
            Some(mask) => Some(fit_to_target(mask.clone(), target_w, target_h)?),
            None => None,
        };
        self.compressed = compressed;
        self.display = None;
        self.target = (target_w, target_h);
        Ok(())
    }

    /// Re-register the stored mask after the source image placement changed.
    pub fn realign(
        &mut self,
        from: Option<BiasState>,
        to: BiasState,
        image: (u32, u32),
    ) -> Result<(), MaskError> {
        let Some(mask) = &self.compressed else {
            return Ok(());
        };
        let realigned = realign_mask(mask, from, to, image, self.target)?;
        self.compressed = Some(realigned);
        self.display = None;
        Ok(())
    }
}
