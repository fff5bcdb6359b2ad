//! Self-service email composition.
//!
//! The create-password email carries a localized subject/text/html body,
//! a ZIP with per-OS setup scripts, and the inline images the HTML body
//! references by Content-ID.

use std::io::Write;

use serde_json::Value;

use swanportal_adapters::{EmailAttachment, LogSink};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::overlayfs::OverlayFs;
use super::templates::TemplateSet;

/// Inline image assets referenced from the HTML body, `(file, cid)`.
const INLINE_IMAGES: [(&str, &str); 11] = [
    ("android-accept.png", "android-accept"),
    ("android-eye.png", "android-eye"),
    ("android-back.png", "android-back"),
    ("android-cancel.png", "android-cancel"),
    ("android-home.png", "android-home"),
    ("android-overview.png", "android-overview"),
    ("android-status.png", "android-status"),
    ("android-toggle.png", "android-toggle"),
    ("android-updown.png", "android-updown"),
    ("logo.png", "logo"),
    ("macos-updown.png", "macos-updown"),
];

/// Placeholder body used when a template cannot be rendered; the mail is
/// still sent so the user is not left waiting.
const RENDER_ERROR: &str = "!!!TEMPLATE RENDERING ERROR!!!";

/// A fully composed create-password message.
#[derive(Debug)]
pub struct SelfServiceEmail {
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Compose the create-password email.
///
/// Returns `None` only when the setup-script ZIP cannot be produced.
pub fn build_self_service_email(
    log: &dyn LogSink,
    templates: &TemplateSet,
    attachments_fs: &OverlayFs,
    host: &str,
    tags: &[String],
    context: &Value,
) -> Option<SelfServiceEmail> {
    let render = |name: &str| {
        templates.render(name, tags, context).unwrap_or_else(|| {
            log.error("Failed to render template", &[("templateName", name)]);
            RENDER_ERROR.to_string()
        })
    };

    let subject = render("email-create-password-subject.txt");
    let body_text = render("email-create-password-body.txt");
    let body_html = render("email-create-password-body.html");
    let linux_script = render("email-create-password-attachment-vpn-setup-linux.sh");
    let windows_script = render("email-create-password-attachment-vpn-setup-windows.ps1");

    let zip_data = match build_setup_zip(host, &linux_script, &windows_script) {
        Ok(zip_data) => zip_data,
        Err(e) => {
            log.error("Failed to create ZIP file", &[("err", &e.to_string())]);
            return None;
        }
    };

    let mut attachments = Vec::with_capacity(INLINE_IMAGES.len() + 1);
    for (file_name, content_id) in INLINE_IMAGES {
        attachments.push(EmailAttachment::inline_or_empty(
            log,
            file_name,
            attachments_fs.read(file_name),
            "image/png",
            content_id,
        ));
    }
    attachments.push(EmailAttachment::file(
        format!("VPN-[{host}].zip"),
        zip_data,
        "application/zip",
    ));

    Some(SelfServiceEmail {
        subject,
        body_text,
        body_html,
        attachments,
    })
}

/// ZIP the two setup scripts, named after the portal host.
fn build_setup_zip(
    host: &str,
    linux_script: &str,
    windows_script: &str,
) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file(format!("VPN-Linux-[{host}].sh"), options)?;
    writer.write_all(linux_script.as_bytes())?;

    writer.start_file(format!("VPN-Windows-[{host}].ps1"), options)?;
    writer.write_all(windows_script.as_bytes())?;

    Ok(writer.finish()?.into_inner())
}
