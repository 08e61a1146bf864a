//! Commands valid in the not-authenticated state: CAPABILITY, LOGIN and
//! (falling through to `wrong_state` otherwise, since STARTTLS is
//! handled by the connection loop before a command ever reaches here).
//! Ported from the teacher's `src/imap/command/anonymous.rs`, adapted
//! from the old `boitalettres` response shape to `Response`/`flow`.

use anyhow::{Context, Result};
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::core::{AString, IString};

use oryx_user::login::ArcLoginProvider;

use crate::imap::capability::ServerCapability;
use crate::imap::command::anystate;
use crate::imap::flow;
use crate::imap::response::Response;
use crate::user::User;

pub struct AnonymousContext<'a> {
    pub req: &'a imap_codec::imap_types::command::Command<'static>,
    pub login_provider: &'a ArcLoginProvider,
    pub server_capabilities: &'a ServerCapability,
    pub db: &'a std::sync::Arc<dyn oryx_mail::Database>,
}

pub async fn dispatch<'a>(
    ctx: AnonymousContext<'a>,
) -> Result<(Response<'static>, flow::Transition)> {
    match &ctx.req.body {
        CommandBody::Capability => {
            anystate::capability(ctx.req.tag.clone(), ctx.server_capabilities)
        }
        CommandBody::Logout => anystate::logout(),
        CommandBody::Noop => anystate::noop_nothing(ctx.req.tag.clone()),
        CommandBody::Login { username, password } => login(&ctx, username, password).await,
        _ => anystate::wrong_state(ctx.req.tag.clone()),
    }
}

fn astring_to_string(v: &AString) -> Result<String> {
    let bytes = match v {
        AString::Atom(a) => a.inner().as_bytes(),
        AString::String(IString::Literal(l)) => l.as_ref(),
        AString::String(IString::Quoted(q)) => q.inner().as_bytes(),
    };
    Ok(std::str::from_utf8(bytes)
        .context("non-utf8 credential")?
        .to_string())
}

async fn login<'a>(
    ctx: &AnonymousContext<'a>,
    username: &AString<'a>,
    password: &AString<'a>,
) -> Result<(Response<'static>, flow::Transition)> {
    let tag = ctx.req.tag.clone();
    let u = astring_to_string(username)?;
    let p = astring_to_string(password)?;
    tracing::info!(user = %u, "command.login");

    let creds = match ctx.login_provider.login(&u, &p).await {
        Err(e) => {
            tracing::debug!(error = %e, "authentication failed");
            return Ok((
                Response::build()
                    .tag(tag)
                    .message("Authentication failed")
                    .no()?,
                flow::Transition::None,
            ));
        }
        Ok(c) => c,
    };

    let user = User::new(creds, ctx.db.clone()).await?;
    tracing::info!(username = %u, "connected");

    Ok((
        Response::build()
            .tag(tag)
            .message("Logged in")
            .ok()?,
        flow::Transition::Authenticate(user),
    ))
}
