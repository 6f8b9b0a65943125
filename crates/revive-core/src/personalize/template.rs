//! Placeholder substitution, the last rung of the personalization chain.
//!
//! Supported placeholders:
//! - `{nome}`: contact first name
//! - `{nome_completo}`: contact full name
//! - `{titulo}`: appointment title
//! - `{data}`: appointment date, `dd/mm/yyyy` in the company timezone
//! - `{horario}`: appointment time, `HH:MM` in the company timezone
//! - `{local}`: appointment location

use chrono::{Datelike, Weekday};

use crate::models::{AppointmentContext, MessageContext};

/// Sent when a template renders to nothing
pub const DEFAULT_FOLLOW_UP: &str = "Olá! Ainda posso te ajudar com alguma coisa?";
pub const DEFAULT_REMINDER: &str = "Olá! Passando para lembrar do seu compromisso conosco.";

pub fn render(template: &str, context: &MessageContext) -> String {
    let contact = context.contact();
    let mut text = template
        .replace("{nome_completo}", contact.name.as_deref().unwrap_or(""))
        .replace("{nome}", contact.first_name().unwrap_or(""));

    if let MessageContext::Reminder(reminder) = context {
        text = text
            .replace("{titulo}", &reminder.appointment.title)
            .replace("{data}", &local_date(reminder))
            .replace("{horario}", &local_time(reminder))
            .replace(
                "{local}",
                reminder.appointment.location.as_deref().unwrap_or(""),
            );
    }

    let text = tidy(&text);
    if text.is_empty() {
        match context {
            MessageContext::FollowUp(_) => DEFAULT_FOLLOW_UP.to_string(),
            MessageContext::Reminder(_) => DEFAULT_REMINDER.to_string(),
        }
    } else {
        text
    }
}

pub fn local_date(reminder: &AppointmentContext) -> String {
    reminder
        .appointment
        .starts_at
        .with_timezone(&reminder.timezone)
        .format("%d/%m/%Y")
        .to_string()
}

pub fn local_time(reminder: &AppointmentContext) -> String {
    reminder
        .appointment
        .starts_at
        .with_timezone(&reminder.timezone)
        .format("%H:%M")
        .to_string()
}

pub fn local_weekday(reminder: &AppointmentContext) -> &'static str {
    match reminder
        .appointment
        .starts_at
        .with_timezone(&reminder.timezone)
        .weekday()
    {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// Collapse the gaps left by empty placeholders ("Olá , tudo bem?")
fn tidy(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .replace(" ,", ",")
                .replace(" !", "!")
                .replace(" ?", "?")
                .replace(" .", ".")
        })
        .collect();
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Appointment, Contact, Conversation, ConversationContext, ReminderType,
    };
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn contact(name: Option<&str>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: name.map(String::from),
            phone: "5511988887777".to_string(),
        }
    }

    fn follow_up(name: Option<&str>) -> MessageContext {
        let contact = contact(name);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            company_id: contact.company_id,
            contact_id: contact.id,
            agent_id: Some(Uuid::new_v4()),
            status: "open".to_string(),
            ai_enabled: true,
            ai_paused: false,
            assigned_user_id: None,
            metadata: serde_json::json!({}),
            thread_id: None,
            last_message_at: None,
        };
        MessageContext::FollowUp(ConversationContext::new(
            conversation,
            contact,
            Vec::new(),
            Utc::now(),
        ))
    }

    fn reminder(location: Option<&str>) -> MessageContext {
        let contact = contact(Some("João Pereira"));
        MessageContext::Reminder(AppointmentContext {
            appointment: Appointment {
                id: Uuid::new_v4(),
                company_id: contact.company_id,
                contact_id: contact.id,
                title: "Consulta".to_string(),
                // 17:30 in São Paulo
                starts_at: Utc.with_ymd_and_hms(2024, 6, 7, 20, 30, 0).unwrap(),
                location: location.map(String::from),
                status: "scheduled".to_string(),
            },
            contact,
            timezone: chrono_tz::America::Sao_Paulo,
            reminder_type: ReminderType::Reminder,
            lead_minutes: 60,
        })
    }

    #[test]
    fn test_render_follow_up_name() {
        let text = render("Oi {nome}, conseguiu ver a proposta?", &follow_up(Some("Ana Souza")));
        assert_eq!(text, "Oi Ana, conseguiu ver a proposta?");

        let text = render("{nome_completo}", &follow_up(Some("Ana Souza")));
        assert_eq!(text, "Ana Souza");
    }

    #[test]
    fn test_render_single_name() {
        let text = render("Olá {nome}, ainda podemos ajudar?", &follow_up(Some("Maria")));
        assert_eq!(text, "Olá Maria, ainda podemos ajudar?");
    }

    #[test]
    fn test_render_reminder_leaves_no_placeholders() {
        let MessageContext::Reminder(mut ctx) = reminder(None) else {
            unreachable!()
        };
        ctx.appointment.starts_at = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();

        let text = render("Lembrete: {data} às {horario}", &MessageContext::Reminder(ctx));
        assert_eq!(text, "Lembrete: 01/06/2024 às 12:00");
    }

    #[test]
    fn test_render_missing_name_is_tidied() {
        let text = render("Oi {nome}, tudo bem?", &follow_up(None));
        assert_eq!(text, "Oi, tudo bem?");
    }

    #[test]
    fn test_render_reminder_uses_company_timezone() {
        let text = render(
            "{nome}, sua {titulo} é {data} às {horario} em {local}.",
            &reminder(Some("Av. Paulista, 1000")),
        );
        assert_eq!(
            text,
            "João, sua Consulta é 07/06/2024 às 17:30 em Av. Paulista, 1000."
        );
    }

    #[test]
    fn test_render_never_empty() {
        assert_eq!(render("   ", &follow_up(None)), DEFAULT_FOLLOW_UP);
        assert_eq!(render("{local}", &reminder(None)), DEFAULT_REMINDER);
    }

    #[test]
    fn test_follow_up_ignores_reminder_placeholders() {
        let text = render("Olá {nome} {data}", &follow_up(Some("Bia")));
        assert_eq!(text, "Olá Bia {data}");
    }

    #[test]
    fn test_local_weekday() {
        if let MessageContext::Reminder(r) = reminder(None) {
            assert_eq!(local_weekday(&r), "sexta-feira");
        } else {
            unreachable!();
        }
    }
}
