//! One logical request: build, dispatch through the redirect loop (and an
//! auth negotiator when asked), then fold the outcome into a [`Response`].

use std::sync::Arc;

use crate::config::{AuthMode, DEFAULT_TIMEOUT, Options, Params, ResponseType};
use crate::context::VuContext;
use crate::errors::Error;
use crate::http_client::auth::DigestNegotiator;
use crate::http_client::debug::RequestLogger;
use crate::http_client::ntlm::NtlmNegotiator;
use crate::http_client::redirect::{RedirectOutcome, RedirectPolicy, follow};
use crate::http_client::request::{Method, PreparedRequest, RequestBody};
use crate::http_client::response::{HopFacts, RequestEcho, Response};
use crate::http_client::round_trip::TracingRoundTripper;
use crate::http_client::url_tag::UrlArg;
use crate::metrics::TagSet;

/// Run tags, caller tags, then group/vu/iter. Per-hop keys are added by the round tripper.
fn base_tags(ctx: &VuContext, params: &Params) -> TagSet {
    let enabled = &ctx.options().system_tags;
    let mut tags: TagSet = ctx.options().run_tags.clone().into_iter().collect();
    for (key, value) in &params.tags {
        tags.insert(key.clone(), value.clone());
    }
    tags.insert_system(enabled, "group", ctx.group());
    if let Some(vu) = ctx.vu() {
        tags.insert_system(enabled, "vu", vu.to_string());
    }
    if let Some(iteration) = ctx.iteration() {
        tags.insert_system(enabled, "iter", iteration.to_string());
    }
    tags
}

fn response_type(params: &Params, options: &Options) -> ResponseType {
    params.response_type.unwrap_or(if options.discard_response_bodies {
        ResponseType::None
    } else {
        ResponseType::Text
    })
}

/// Report a failure: warn unless cancelled, then throw or hand back the response.
fn settle(ctx: &VuContext, url: &str, response: Response, error: Error, throw: bool) -> Result<Response, Error> {
    if !error.is_cancelled() && !ctx.cancellation().is_cancelled() {
        log::warn!("Request Failed: {error} (url: {url})");
    }
    if throw { Err(error) } else { Ok(response) }
}

/// Execute one request in `ctx`.
///
/// Argument errors are always returned as `Err`. Request failures either
/// become `Err` (when `throw` is in effect) or are recorded on the returned
/// response's `error`/`error_code`.
pub async fn execute(
    ctx: &VuContext,
    method: Method,
    target: &UrlArg,
    body: Option<RequestBody>,
    params: &Params,
) -> Result<Response, Error> {
    let options = ctx.options();
    let throw = params.throw.unwrap_or(options.throw);

    let prepared = match PreparedRequest::build(method, target, body, params, options) {
        Ok(prepared) => prepared,
        Err(err) if err.kind.is_request_failure() => {
            let response = Response::failed(target.url().to_string(), &err, HopFacts::default(), RequestEcho::default());
            return settle(ctx, target.url(), response, err, throw);
        }
        Err(err) => return Err(err),
    };

    let jar = params.jar.as_ref().or(ctx.ambient_jar());
    let name = params.tags.get("name").cloned().or_else(|| prepared.name.clone());
    let timeout = params.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let logger = RequestLogger::new(Arc::clone(ctx.emitter()), options.http_debug);
    let rt = TracingRoundTripper::new(ctx, &logger, base_tags(ctx, params), name, timeout);
    let policy = RedirectPolicy::new(params.redirects, options.max_redirects);

    let outcome = match (params.auth.unwrap_or_default(), prepared.credentials.clone()) {
        (AuthMode::Ntlm, _) => {
            let negotiator = NtlmNegotiator::new(&rt);
            follow(&negotiator, &prepared, jar, &params.cookies, policy, &logger).await
        }
        (AuthMode::Digest, Some(credentials)) => {
            let negotiator = DigestNegotiator::new(&rt, credentials);
            follow(&negotiator, &prepared, jar, &params.cookies, policy, &logger).await
        }
        _ => follow(&rt, &prepared, jar, &params.cookies, policy, &logger).await,
    };

    match outcome {
        Ok(RedirectOutcome {
            response,
            url,
            request,
            exhausted,
        }) => {
            let (parts, body) = response.into_parts();
            let mut response = Response::completed(
                url.to_string(),
                &parts,
                body,
                response_type(params, options),
                rt.take_last(),
                request,
            );
            match exhausted {
                None => Ok(response),
                Some(err) => {
                    response.set_error(&err);
                    settle(ctx, url.as_str(), response, err, throw)
                }
            }
        }
        Err(failure) => {
            let response = Response::failed(failure.url.to_string(), &failure.error, rt.take_last(), failure.request);
            settle(ctx, failure.url.as_str(), response, failure.error, throw)
        }
    }
}
