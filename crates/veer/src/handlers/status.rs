use super::Outcome;
use crate::config::StatusTarget;
use crate::dispatch::RequestContext;
use crate::response::ResponseBuilder;
use crate::template::interpolate;

/// Answer with the configured status, interpolated headers and no body.
pub fn respond(ctx: &RequestContext, captures: &[String], target: &StatusTarget) -> Outcome {
    let data = ctx.template_data();
    let builder = target
        .headers
        .iter()
        .fold(ResponseBuilder::new(target.status), |builder, (name, value)| {
            builder.header(name, &interpolate(value, captures, &data))
        });
    Outcome::Completed(builder.build())
}
