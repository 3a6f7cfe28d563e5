//! Scene state machine: scene trait, shared scene flags, and the scene
//! stack that owns game flow.
//!
//! The stack's top scene is the only one that receives input, update, and
//! render each tick; scenes below it are paused, not destroyed, until
//! popped. Scenes ask for transitions by queueing a [`SceneRequest`]
//! through their context; the driver applies the queue between frames with
//! [`SceneStack::apply`], so the stack is never mutated while a scene is
//! borrowed.

use anyhow::Result;

/// Name and activity flags shared by every scene. Embed one and hand it
/// back from [`Scene::base`]/[`Scene::base_mut`].
#[derive(Debug, Clone)]
pub struct SceneBase {
    name: &'static str,
    is_active: bool,
    is_visible: bool,
}

impl SceneBase {
    pub fn new(name: &'static str) -> Self {
        log::debug!("scene created: {name}");
        Self {
            name,
            is_active: true,
            is_visible: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    /// Resume updates.
    pub fn play(&mut self) {
        self.is_active = true;
        log::debug!("scene play: {}", self.name);
    }

    /// Suspend updates (rendering is unaffected).
    pub fn stop(&mut self) {
        self.is_active = false;
        log::debug!("scene stop: {}", self.name);
    }

    /// Make the scene render again.
    pub fn show(&mut self) {
        self.is_visible = true;
        log::debug!("scene show: {}", self.name);
    }

    /// Skip rendering (updates are unaffected).
    pub fn hide(&mut self) {
        self.is_visible = false;
        log::debug!("scene hide: {}", self.name);
    }
}

/// A game screen with a four-phase lifecycle: `initialize` once when
/// installed, then `process_input` → `update` → `render` every frame while
/// on top of the stack, and `finalize` once on removal.
///
/// `C` is the context the driver threads through every phase (renderer,
/// input, audio, transition queue, …).
pub trait Scene<C> {
    fn base(&self) -> &SceneBase;
    fn base_mut(&mut self) -> &mut SceneBase;

    /// One-time setup. An error here is fatal: the scene is not installed
    /// and the caller must halt, since a half-initialized scene has no
    /// recovery path.
    fn initialize(&mut self, ctx: &mut C) -> Result<()>;

    fn process_input(&mut self, ctx: &mut C);

    fn update(&mut self, ctx: &mut C, dt: f32);

    fn render(&mut self, ctx: &mut C) -> Result<()>;

    fn finalize(&mut self, ctx: &mut C);
}

/// A transition requested by a scene, applied by the driver after the
/// frame's update.
pub enum SceneRequest<C> {
    Push(Box<dyn Scene<C>>),
    Pop,
    Replace(Box<dyn Scene<C>>),
    Quit,
}

/// Stack of scenes: the game's top-level state machine.
#[derive(Default)]
pub struct SceneStack<C> {
    scenes: Vec<Box<dyn Scene<C>>>,
}

impl<C> SceneStack<C> {
    pub fn new() -> Self {
        Self { scenes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Name of the current (top) scene.
    pub fn current_name(&self) -> Option<&'static str> {
        self.scenes.last().map(|s| s.base().name())
    }

    /// Initialize `scene` and install it as the new top. On failure the
    /// stack is unchanged and the error propagates.
    pub fn push(&mut self, ctx: &mut C, mut scene: Box<dyn Scene<C>>) -> Result<()> {
        log::info!("scene push: {}", scene.base().name());
        scene.initialize(ctx)?;
        self.scenes.push(scene);
        Ok(())
    }

    /// Finalize and remove the top scene. The scene below (if any) simply
    /// resumes; it is not re-initialized.
    pub fn pop(&mut self, ctx: &mut C) {
        if let Some(mut scene) = self.scenes.pop() {
            log::info!("scene pop: {}", scene.base().name());
            scene.finalize(ctx);
        }
    }

    /// Replace the top scene: the old top is finalized and removed before
    /// the new scene is initialized and installed.
    pub fn replace(&mut self, ctx: &mut C, scene: Box<dyn Scene<C>>) -> Result<()> {
        self.pop(ctx);
        self.push(ctx, scene)
    }

    /// Forward input to the current scene, if it is active.
    pub fn process_input(&mut self, ctx: &mut C) {
        if let Some(scene) = self.scenes.last_mut() {
            if scene.base().is_active() {
                scene.process_input(ctx);
            }
        }
    }

    /// Update the current scene, if it is active.
    pub fn update(&mut self, ctx: &mut C, dt: f32) {
        if let Some(scene) = self.scenes.last_mut() {
            if scene.base().is_active() {
                scene.update(ctx, dt);
            }
        }
    }

    /// Render the current scene, if it is visible.
    pub fn render(&mut self, ctx: &mut C) -> Result<()> {
        if let Some(scene) = self.scenes.last_mut() {
            if scene.base().is_visible() {
                return scene.render(ctx);
            }
        }
        Ok(())
    }

    /// Apply queued transition requests in order. Returns `true` when a
    /// quit was requested; later requests in the same batch are ignored.
    pub fn apply(&mut self, ctx: &mut C, requests: Vec<SceneRequest<C>>) -> Result<bool> {
        for request in requests {
            match request {
                SceneRequest::Push(scene) => self.push(ctx, scene)?,
                SceneRequest::Pop => self.pop(ctx),
                SceneRequest::Replace(scene) => self.replace(ctx, scene)?,
                SceneRequest::Quit => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Finalize every remaining scene, top first. Called at shutdown.
    pub fn clear(&mut self, ctx: &mut C) {
        while !self.scenes.is_empty() {
            self.pop(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared event log the test scenes write lifecycle entries into.
    type Log = Rc<RefCell<Vec<String>>>;

    struct TestCtx {
        log: Log,
    }

    struct TestScene {
        base: SceneBase,
        fail_init: bool,
    }

    impl TestScene {
        fn boxed(name: &'static str) -> Box<dyn Scene<TestCtx>> {
            Box::new(Self {
                base: SceneBase::new(name),
                fail_init: false,
            })
        }

        fn failing(name: &'static str) -> Box<dyn Scene<TestCtx>> {
            Box::new(Self {
                base: SceneBase::new(name),
                fail_init: true,
            })
        }
    }

    impl Scene<TestCtx> for TestScene {
        fn base(&self) -> &SceneBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut SceneBase {
            &mut self.base
        }
        fn initialize(&mut self, ctx: &mut TestCtx) -> Result<()> {
            if self.fail_init {
                anyhow::bail!("resource missing");
            }
            ctx.log.borrow_mut().push(format!("init {}", self.base.name()));
            Ok(())
        }
        fn process_input(&mut self, _ctx: &mut TestCtx) {}
        fn update(&mut self, ctx: &mut TestCtx, _dt: f32) {
            ctx.log.borrow_mut().push(format!("update {}", self.base.name()));
        }
        fn render(&mut self, _ctx: &mut TestCtx) -> Result<()> {
            Ok(())
        }
        fn finalize(&mut self, ctx: &mut TestCtx) {
            ctx.log.borrow_mut().push(format!("fini {}", self.base.name()));
        }
    }

    fn ctx() -> (TestCtx, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        (TestCtx { log: log.clone() }, log)
    }

    #[test]
    fn push_then_pop_restores_previous_top() {
        let (mut ctx, log) = ctx();
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("title")).unwrap();
        stack.push(&mut ctx, TestScene::boxed("status")).unwrap();
        assert_eq!(stack.current_name(), Some("status"));

        stack.pop(&mut ctx);
        assert_eq!(stack.current_name(), Some("title"));

        let entries = log.borrow();
        let finis: Vec<_> = entries.iter().filter(|e| e.starts_with("fini")).collect();
        assert_eq!(finis, ["fini status"], "finalize exactly once, status only");
    }

    #[test]
    fn replace_finalizes_old_before_initializing_new() {
        let (mut ctx, log) = ctx();
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("main")).unwrap();
        stack.replace(&mut ctx, TestScene::boxed("gameover")).unwrap();

        assert_eq!(stack.len(), 1);
        assert_eq!(stack.current_name(), Some("gameover"));
        let entries = log.borrow();
        let fini = entries.iter().position(|e| e == "fini main").unwrap();
        let init = entries.iter().position(|e| e == "init gameover").unwrap();
        assert!(fini < init, "old top must be finalized before the new initializes");
    }

    #[test]
    fn failed_initialize_leaves_stack_unchanged() {
        let (mut ctx, _log) = ctx();
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("title")).unwrap();
        let err = stack.push(&mut ctx, TestScene::failing("broken"));
        assert!(err.is_err());
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.current_name(), Some("title"));
    }

    #[test]
    fn only_top_scene_updates() {
        let (mut ctx, log) = ctx();
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("below")).unwrap();
        stack.push(&mut ctx, TestScene::boxed("top")).unwrap();
        stack.update(&mut ctx, 0.016);
        let entries = log.borrow();
        assert!(entries.contains(&"update top".to_string()));
        assert!(!entries.contains(&"update below".to_string()));
    }

    #[test]
    fn stopped_scene_skips_update() {
        let (mut ctx, log) = ctx();
        let mut stack = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("paused")).unwrap();
        if let Some(name) = stack.current_name() {
            assert_eq!(name, "paused");
        }
        // Stop via apply-like direct access: scenes normally stop themselves.
        stack.scenes.last_mut().unwrap().base_mut().stop();
        stack.update(&mut ctx, 0.016);
        assert!(!log.borrow().iter().any(|e| e == "update paused"));
    }

    #[test]
    fn quit_request_wins_over_later_requests() {
        let (mut ctx, _log) = ctx();
        let mut stack: SceneStack<TestCtx> = SceneStack::new();
        stack.push(&mut ctx, TestScene::boxed("title")).unwrap();
        let quit = stack
            .apply(
                &mut ctx,
                vec![
                    SceneRequest::Quit,
                    SceneRequest::Push(TestScene::boxed("never")),
                ],
            )
            .unwrap();
        assert!(quit);
        assert_eq!(stack.len(), 1, "requests after quit are ignored");
    }
}
