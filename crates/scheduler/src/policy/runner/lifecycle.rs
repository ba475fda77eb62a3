use std::sync::Arc;

use tracing::{debug, info, warn};

use super::core::RendererScheduler;
use crate::idle::IdlePeriodState;
use crate::manager::lock;
use crate::policy::types::{BeginFrameArgs, NavigatingFrameType, UpdateType};
use crate::time_domain::{TimeDomain, VirtualTimeDomain};

impl RendererScheduler {
    // ── Frames ──────────────────────────────────────────────────────

    /// A main frame is about to be produced. Ends any idle period.
    pub fn will_begin_frame(&self, args: &BeginFrameArgs) {
        if self.helper.is_shutdown() {
            return;
        }
        self.end_idle_period();
        {
            let mut main = lock(&self.main_thread);
            main.estimated_next_frame_begin = args.frame_time + args.interval;
            main.have_seen_a_begin_main_frame = true;
            main.begin_frame_not_expected_soon = false;
            main.compositor_frame_interval = args.interval;
            lock(&self.any_thread).begin_main_frame_on_critical_path = args.on_critical_path;
        }
    }

    /// The frame was handed to the compositor. Whatever is left before the
    /// next expected frame becomes a short idle period.
    pub fn did_commit_frame_to_compositor(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        let now = self.helper.now();
        let next_frame_begin = lock(&self.main_thread).estimated_next_frame_begin;
        if now < next_frame_begin {
            self.idle_helper
                .start_idle_period(IdlePeriodState::InShortIdlePeriod, now, next_frame_begin);
        }
        self.idle_time_estimator.did_commit_frame_to_compositor();
    }

    /// No frame is coming for a while, so a long idle period may start.
    pub fn begin_frame_not_expected_soon(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        lock(&self.main_thread).begin_frame_not_expected_soon = true;
        self.idle_helper.enable_long_idle_period();
        lock(&self.any_thread).begin_main_frame_on_critical_path = false;
    }

    pub fn set_has_visible_render_widget_with_touch_handler(&self, has_handler: bool) {
        {
            let mut main = lock(&self.main_thread);
            if main.has_visible_render_widget_with_touch_handler == has_handler {
                return;
            }
            main.has_visible_render_widget_with_touch_handler = has_handler;
        }
        self.force_update_policy();
    }

    // ── Visibility ──────────────────────────────────────────────────

    /// With every widget hidden no frames are produced, so idle work runs
    /// in long idle periods until `end_idle_when_hidden_delay` passes.
    pub fn set_all_render_widgets_hidden(&self, hidden: bool) {
        if self.helper.is_shutdown() {
            return;
        }
        {
            let mut main = lock(&self.main_thread);
            if main.renderer_hidden == hidden {
                return;
            }
            main.renderer_hidden = hidden;
        }
        self.end_renderer_hidden_idle_period.cancel();

        if hidden {
            self.idle_helper.enable_long_idle_period();
            let weak = self.weak_self.clone();
            self.helper.control_task_queue().post_task_with_handle(
                move || {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.end_idle_period();
                    }
                },
                self.config.end_idle_when_hidden_delay(),
                &self.end_renderer_hidden_idle_period.handle(),
            );
        } else {
            self.end_idle_period();
        }
        debug!(hidden, "render widget visibility changed");
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }

    pub fn on_renderer_backgrounded(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        let suspend_timers = {
            let mut main = lock(&self.main_thread);
            if main.renderer_backgrounded {
                return;
            }
            main.renderer_backgrounded = true;
            main.timer_queue_suspension_when_backgrounded_enabled
        };
        info!("renderer backgrounded");
        if !suspend_timers {
            return;
        }

        self.suspend_timers_when_backgrounded.cancel();
        let weak = self.weak_self.clone();
        self.helper.control_task_queue().post_task_with_handle(
            move || {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.suspend_timer_queue_when_backgrounded();
                }
            },
            self.config.suspend_timers_when_backgrounded_delay(),
            &self.suspend_timers_when_backgrounded.handle(),
        );
    }

    pub fn on_renderer_foregrounded(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        {
            let mut main = lock(&self.main_thread);
            if !main.renderer_backgrounded {
                return;
            }
            main.renderer_backgrounded = false;
            main.renderer_suspended = false;
        }
        info!("renderer foregrounded");
        self.suspend_timers_when_backgrounded.cancel();
        self.resume_timer_queue_when_foregrounded();
    }

    /// Stop loading and timer work in a backgrounded renderer until it is
    /// foregrounded again.
    pub fn suspend_renderer(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        {
            let mut main = lock(&self.main_thread);
            if !main.renderer_backgrounded {
                drop(main);
                warn!("suspend_renderer ignored, renderer is not backgrounded");
                return;
            }
            main.renderer_suspended = true;
        }
        self.suspend_timers_when_backgrounded.cancel();
        info!("renderer suspended");
        self.suspend_timer_queue_when_backgrounded();
    }

    fn suspend_timer_queue_when_backgrounded(&self) {
        {
            let mut main = lock(&self.main_thread);
            if main.timer_queue_suspended_when_backgrounded {
                return;
            }
            main.timer_queue_suspended_when_backgrounded = true;
        }
        self.force_update_policy();
    }

    fn resume_timer_queue_when_foregrounded(&self) {
        {
            let mut main = lock(&self.main_thread);
            if !main.timer_queue_suspended_when_backgrounded {
                return;
            }
            main.timer_queue_suspended_when_backgrounded = false;
        }
        self.force_update_policy();
    }

    pub fn set_timer_queue_suspension_when_backgrounded_enabled(&self, enabled: bool) {
        lock(&self.main_thread).timer_queue_suspension_when_backgrounded_enabled = enabled;
    }

    // ── Timer suspension ────────────────────────────────────────────

    /// Reference-counted: timers stay suspended until every
    /// `suspend_timer_queue` is matched by a `resume_timer_queue`.
    pub fn suspend_timer_queue(&self) {
        lock(&self.main_thread).timer_queue_suspend_count += 1;
        self.force_update_policy();
    }

    pub fn resume_timer_queue(&self) {
        {
            let mut main = lock(&self.main_thread);
            if main.timer_queue_suspend_count == 0 {
                drop(main);
                warn!("resume_timer_queue without a matching suspend");
                return;
            }
            main.timer_queue_suspend_count -= 1;
        }
        self.force_update_policy();
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Expensive-task blocking stays off while a main frame navigation is
    /// pending.
    pub fn add_pending_navigation(&self, frame_type: NavigatingFrameType) {
        if frame_type != NavigatingFrameType::MainFrame {
            return;
        }
        lock(&self.main_thread).navigation_task_expected_count += 1;
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }

    pub fn remove_pending_navigation(&self, frame_type: NavigatingFrameType) {
        if frame_type != NavigatingFrameType::MainFrame {
            return;
        }
        {
            let mut main = lock(&self.main_thread);
            main.navigation_task_expected_count =
                main.navigation_task_expected_count.saturating_sub(1);
        }
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }

    /// A new document is loading. Forget everything learned about the
    /// previous one.
    pub fn on_navigation_started(&self) {
        let now = self.helper.now();
        {
            let mut main = lock(&self.main_thread);
            {
                let mut any = lock(&self.any_thread);
                any.user_model.reset(now);
                any.have_seen_touchstart = false;
                any.have_seen_input_since_navigation = false;
            }
            main.have_seen_a_begin_main_frame = false;
            main.have_reported_blocking_intervention_since_navigation = false;
        }
        self.loading_cost_estimator.clear();
        self.timer_cost_estimator.clear();
        self.idle_time_estimator.clear();
        info!("navigation started, scheduler estimates reset");
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }

    pub fn set_expensive_task_blocking_allowed(&self, allowed: bool) {
        lock(&self.main_thread).expensive_task_blocking_allowed = allowed;
        self.force_update_policy();
    }

    // ── Virtual time ────────────────────────────────────────────────

    /// Move every queue onto an auto-advancing virtual timeline starting at
    /// the current time. Throttling is disabled from then on.
    pub fn enable_virtual_time(&self) {
        if self.helper.is_shutdown() {
            return;
        }
        let domain = {
            let mut slot = lock(&self.virtual_time_domain);
            match slot.as_ref() {
                Some(domain) => Arc::clone(domain),
                None => {
                    let virtual_domain = Arc::new(VirtualTimeDomain::new(self.helper.now()));
                    virtual_domain.set_auto_advance(true);
                    let domain: Arc<dyn TimeDomain> = virtual_domain;
                    self.helper.register_time_domain(Arc::clone(&domain));
                    *slot = Some(Arc::clone(&domain));
                    domain
                }
            }
        };
        lock(&self.main_thread).use_virtual_time = true;

        let unthrottled = lock(&self.queues).unthrottled.clone();
        for queue in &unthrottled {
            queue.set_time_domain(Arc::clone(&domain));
        }
        self.throttling.enable_virtual_time(Arc::clone(&domain));
        info!("virtual time enabled");
        self.force_update_policy();
    }

    /// Ends the current idle period, if any.
    pub fn end_idle_period(&self) {
        self.idle_helper.end_idle_period();
    }
}
