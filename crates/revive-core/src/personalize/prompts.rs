use crate::models::{Agent, AppointmentContext, ConversationContext, MessageContext, ReminderType};

use super::template::{local_date, local_time, local_weekday};

/// Prefix of every internal instruction written to a thread
pub const INSTRUCTION_MARKER: &str = "[INSTRUÇÃO INTERNA";

pub const FOLLOW_UP_MAX_CHARS: usize = 150;
pub const REMINDER_MAX_CHARS: usize = 200;

/// Recent messages quoted in a follow-up instruction
const HISTORY_EXCERPT: usize = 5;

pub fn system_prompt(agent: &Agent) -> String {
    let mut prompt = format!(
        "Você é {}, atendente virtual que conversa com clientes pelo WhatsApp.",
        agent.name
    );
    if let Some(tone) = agent.tone.as_deref().filter(|t| !t.is_empty()) {
        prompt.push_str(&format!(" Seu tom de voz é {}.", tone));
    }
    match agent.language.as_deref().filter(|l| !l.is_empty()) {
        Some(language) => prompt.push_str(&format!(" Responda sempre em {}.", language)),
        None => prompt.push_str(" Responda sempre em português do Brasil."),
    }
    prompt.push_str(" Escreva apenas o texto da mensagem, sem aspas e sem explicações.");
    prompt
}

/// Instruction appended to the thread (or sent alone) for one message
pub fn instruction(template: &str, context: &MessageContext) -> String {
    match context {
        MessageContext::FollowUp(conversation) => follow_up_instruction(template, conversation),
        MessageContext::Reminder(reminder) => reminder_instruction(template, reminder),
    }
}

fn follow_up_instruction(template: &str, ctx: &ConversationContext) -> String {
    let name = ctx.contact.first_name().unwrap_or("o cliente");
    let silence = ctx
        .since_last_message
        .map(|d| format!("{} minutos", d.num_minutes().max(0)))
        .unwrap_or_else(|| "algum tempo".to_string());
    let replied = if ctx.contact_replied {
        "O cliente já respondeu antes nesta conversa."
    } else {
        "O cliente ainda não respondeu nesta conversa."
    };

    let mut prompt = format!(
        "[INSTRUÇÃO INTERNA - NÃO RESPONDA A ESTA MENSAGEM DIRETAMENTE]\n\
         A conversa com {name} está parada há {silence}. {replied}\n\
         Escreva UMA mensagem curta de follow-up para retomar a conversa, \
         continuando naturalmente o último assunto.\n\
         Regras:\n\
         - No máximo {max} caracteres\n\
         - Não cumprimente novamente (nada de \"olá\" ou \"bom dia\")\n\
         - Não repita mensagens anteriores\n\
         - Tom natural, como numa conversa de WhatsApp; use emojis com moderação\n\
         - Use esta mensagem como referência de intenção: \"{template}\"",
        name = name,
        silence = silence,
        replied = replied,
        max = FOLLOW_UP_MAX_CHARS,
        template = template,
    );

    let transcript = ctx.transcript(HISTORY_EXCERPT);
    if !transcript.is_empty() {
        prompt.push_str("\n\nÚltimas mensagens da conversa:\n");
        prompt.push_str(&transcript);
    }
    prompt
}

fn reminder_instruction(template: &str, ctx: &AppointmentContext) -> String {
    let name = ctx.contact.first_name().unwrap_or("o cliente");
    let location = ctx
        .appointment
        .location
        .as_deref()
        .unwrap_or("não informado");
    let purpose = match ctx.reminder_type {
        ReminderType::Confirmation => "pedir que o cliente confirme presença",
        ReminderType::Reminder => "lembrar o cliente do compromisso",
    };

    format!(
        "[INSTRUÇÃO INTERNA - NÃO RESPONDA A ESTA MENSAGEM DIRETAMENTE]\n\
         Escreva UMA mensagem para {purpose}.\n\
         Cliente: {name}\n\
         Compromisso: {title}\n\
         Data: {weekday}, {date}\n\
         Horário: {time}\n\
         Local: {location}\n\
         Antecedência: {lead} minutos antes do início\n\
         Regras:\n\
         - No máximo {max} caracteres\n\
         - Inclua o título, a data e o horário exatamente como acima\n\
         - Tom natural e cordial; use emojis com moderação\n\
         - Use esta mensagem como referência: \"{template}\"",
        purpose = purpose,
        name = name,
        title = ctx.appointment.title,
        weekday = local_weekday(ctx),
        date = local_date(ctx),
        time = local_time(ctx),
        location = location,
        lead = ctx.lead_minutes,
        max = REMINDER_MAX_CHARS,
        template = template,
    )
}

/// Character budget for a generated message
pub fn max_chars(context: &MessageContext) -> usize {
    match context {
        MessageContext::FollowUp(_) => FOLLOW_UP_MAX_CHARS,
        MessageContext::Reminder(_) => REMINDER_MAX_CHARS,
    }
}
