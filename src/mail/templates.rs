//! Email bodies
//!
//! Simple HTML built with `format!`. Anything that came from a user goes
//! through [`escape_html`].

use super::Email;

/// Escape text for inclusion in HTML
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Format paise as rupees, e.g. `₹4,500.00`
pub fn format_rupees(paise: i64) -> String {
    let rupees = paise / 100;
    let fraction = (paise % 100).abs();
    let digits = rupees.abs().to_string();

    // Indian grouping: last three digits, then pairs
    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let mut parts: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 2 {
            parts.push(&head[end - 2..end]);
            end -= 2;
        }
        parts.push(&head[..end]);
        parts.reverse();
        format!("{},{}", parts.join(","), tail)
    };

    let sign = if paise < 0 { "-" } else { "" };
    format!("{sign}₹{grouped}.{fraction:02}")
}

fn layout(school: &str, heading: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><body style=\"font-family:Arial,sans-serif;color:#222\">\
         <h2>{heading}</h2>{body}\
         <p style=\"color:#777;font-size:12px\">{school}</p></body></html>",
        school = escape_html(school),
        heading = escape_html(heading),
    )
}

pub fn enrollment_confirmation(
    school: &str,
    to: &str,
    student_name: &str,
    course_title: &str,
    amount_paise: i64,
) -> Email {
    let body = format!(
        "<p>Hi {name},</p><p>Your enrollment in <strong>{course}</strong> has been received. \
         Complete the payment of {amount} to confirm your seat.</p>",
        name = escape_html(student_name),
        course = escape_html(course_title),
        amount = format_rupees(amount_paise),
    );
    Email {
        to: to.to_string(),
        subject: format!("Enrollment received: {course_title}"),
        html: layout(school, "Enrollment received", &body),
    }
}

pub fn payment_receipt(
    school: &str,
    to: &str,
    student_name: &str,
    course_title: &str,
    amount_paise: i64,
    order_id: &str,
    provider: &str,
) -> Email {
    let body = format!(
        "<p>Hi {name},</p><p>We received your payment of <strong>{amount}</strong> for \
         <strong>{course}</strong>.</p><p>Reference: {order} ({provider})</p>",
        name = escape_html(student_name),
        course = escape_html(course_title),
        amount = format_rupees(amount_paise),
        order = escape_html(order_id),
        provider = escape_html(provider),
    );
    Email {
        to: to.to_string(),
        subject: format!("Payment received: {course_title}"),
        html: layout(school, "Payment received", &body),
    }
}

pub fn certificate_issued(
    school: &str,
    to: &str,
    student_name: &str,
    course_title: &str,
    certificate_number: &str,
    verify_url: &str,
) -> Email {
    let body = format!(
        "<p>Congratulations {name}!</p><p>You have completed <strong>{course}</strong>. \
         Your certificate number is <strong>{number}</strong>.</p>\
         <p>Anyone can verify it at <a href=\"{url}\">{url}</a>.</p>",
        name = escape_html(student_name),
        course = escape_html(course_title),
        number = escape_html(certificate_number),
        url = escape_html(verify_url),
    );
    Email {
        to: to.to_string(),
        subject: format!("Your certificate for {course_title}"),
        html: layout(school, "Certificate issued", &body),
    }
}

pub fn inquiry_acknowledgement(school: &str, to: &str, name: &str) -> Email {
    let body = format!(
        "<p>Hi {name},</p><p>Thanks for getting in touch. Our team will call you back within \
         one working day.</p>",
        name = escape_html(name),
    );
    Email {
        to: to.to_string(),
        subject: format!("We received your message - {school}"),
        html: layout(school, "Thanks for your inquiry", &body),
    }
}

pub fn admin_inquiry_notification(
    school: &str,
    admin_email: &str,
    name: &str,
    email: &str,
    phone: &str,
    message: &str,
) -> Email {
    let body = format!(
        "<p><strong>{name}</strong> &lt;{email}&gt; ({phone}) wrote:</p>\
         <blockquote>{message}</blockquote>",
        name = escape_html(name),
        email = escape_html(email),
        phone = escape_html(phone),
        message = escape_html(message).replace('\n', "<br>"),
    );
    Email {
        to: admin_email.to_string(),
        subject: format!("New inquiry from {name}"),
        html: layout(school, "New inquiry", &body),
    }
}
