/// Builds a handler closure accepted by
/// [`HandlerRegistry::register`](crate::loader::HandlerRegistry::register).
///
/// Takes an optional setup block, run on every fire before the future is
/// created (clone `Arc`s here), and an async body that must evaluate to `bool`.
/// `ctx` is bound to the fire's `Option<JobContext>` inside the body.
///
/// The handler is a `move` closure: whatever the setup block names is moved
/// into it. Clone a handle first if the caller still needs it afterwards.
///
/// # Usage
///
/// ```no_run
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use jobkeeper::{job_handler, HandlerRegistry};
///
/// let registry = HandlerRegistry::new();
/// let counter = Arc::new(AtomicUsize::new(0));
/// let handler_counter = counter.clone();
///
/// registry.register(
///   "reports",
///   "Reports.Daily",
///   job_handler!({ let counter = handler_counter.clone(); } |ctx| {
///     let args = ctx.as_ref().map(|c| c.parameters().to_string()).unwrap_or_default();
///     counter.fetch_add(1, Ordering::SeqCst);
///     !args.is_empty()
///   }),
/// );
///
/// registry.register("reports", "Reports.Noop", job_handler!(|_ctx| { true }));
/// assert_eq!(counter.load(Ordering::SeqCst), 0);
/// ```
#[macro_export]
macro_rules! job_handler {
    (
        { $($setup_stmts:stmt);* $(;)? }
        |$ctx:ident| $main_block:block
    ) => {
        move || {
            $($setup_stmts;)*

            let fut = async move {
                let $ctx: ::std::option::Option<$crate::JobContext> =
                    $crate::try_get_current_job_context();
                $main_block
            };

            Box::pin(fut)
                as ::std::pin::Pin<Box<dyn ::std::future::Future<Output = bool> + Send + 'static>>
        }
    };

    (
        |$ctx:ident| $main_block:block
    ) => {
        move || {
            let fut = async move {
                let $ctx: ::std::option::Option<$crate::JobContext> =
                    $crate::try_get_current_job_context();
                $main_block
            };

            Box::pin(fut)
                as ::std::pin::Pin<Box<dyn ::std::future::Future<Output = bool> + Send + 'static>>
        }
    };
}
