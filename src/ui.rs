use std::collections::HashMap;

use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, Tabs, Wrap},
    Frame,
};

use crate::app::{App, AppMode, DraftField};
use crate::fields::{
    available_values, classify_source, days_in_crm, debug_custom_fields, form_details, format_days,
    format_timestamp, has_form_data, lead_email, mapping_code, FIELD_ID_MAPPING, NOT_PROVIDED,
};
use crate::records::Lead;
use crate::templates::RejectionReason;

const MAPPING_COLUMNS: [Constraint; 4] = [
    Constraint::Length(10),
    Constraint::Percentage(30),
    Constraint::Length(14),
    Constraint::Percentage(50),
];

pub fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Status bar
        ])
        .split(f.size());

    render_title_bar(f, app, chunks[0]);
    render_main_content(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn render_title_bar(f: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["Leads", "Draft", "Field Mapping", "Help"];
    let tabs = Tabs::new(titles.iter().cloned().map(Line::from).collect())
        .block(Block::default().borders(Borders::BOTTOM))
        .highlight_style(Style::default().fg(Color::Yellow))
        .select(match app.mode {
            AppMode::LeadList | AppMode::LeadDetail => 0,
            AppMode::Draft => 1,
            AppMode::FieldMapping => 2,
            AppMode::Help => 3,
        });
    f.render_widget(tabs, area);
}

fn render_main_content(f: &mut Frame, app: &App, area: Rect) {
    match app.mode {
        AppMode::LeadList => render_lead_list_mode(f, app, area),
        AppMode::LeadDetail => render_lead_detail_mode(f, app, area),
        AppMode::Draft => render_draft_mode(f, app, area),
        AppMode::FieldMapping => render_field_mapping_mode(f, app, area),
        AppMode::Help => render_help_mode(f, app, area),
    }
}

/// One list row: form-data marker, name, company and age.
fn lead_row(app: &App, lead: &Lead) -> String {
    let marker = match app.cache.lead(lead.id) {
        Some(details) if has_form_data(details) => "📝 ",
        _ => "   ",
    };
    let days = format_days(days_in_crm(lead.date_created, Utc::now()));
    let drafted = if app.drafts.contains_key(&lead.id) { " [draft]" } else { "" };

    format!(
        "{}{:<30} {:<30} {} days in CRM{}",
        marker,
        lead.display_name(),
        lead.display_company(),
        days,
        drafted
    )
}

fn render_lead_list_mode(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Search
            Constraint::Min(0),    // Leads
        ])
        .split(area);

    let search_style = if app.search_active {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let search = Paragraph::new(app.search_query.as_str())
        .style(search_style)
        .block(Block::default().title("Search leads (/)").borders(Borders::ALL));
    f.render_widget(search, chunks[0]);

    let visible = app.visible_leads();
    let items: Vec<ListItem> = visible
        .iter()
        .enumerate()
        .map(|(i, lead)| {
            let style = if i == app.selected_idx {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            ListItem::new(lead_row(app, lead)).style(style)
        })
        .collect();

    let title = match app.last_refresh {
        Some(at) => format!("Recent Leads ({}) - refreshed {}", visible.len(), at.format("%H:%M:%S")),
        None => format!("Recent Leads ({})", visible.len()),
    };
    let leads = List::new(items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD));

    f.render_widget(leads, chunks[1]);
}

fn label(name: &str) -> Span<'static> {
    Span::styled(format!("{}: ", name), Style::default().fg(Color::Gray))
}

fn heading(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))
}

fn detail_lines(app: &App, lead: &Lead) -> Vec<Line<'static>> {
    let email = lead_email(lead);
    let mut lines = vec![
        Line::from(vec![label("Name"), Span::raw(lead.display_name().to_string())]),
        Line::from(vec![label("Company"), Span::raw(lead.display_company().to_string())]),
        Line::from(vec![label("Created"), Span::raw(format_timestamp(lead.date_created))]),
        Line::from(vec![
            label("Days in CRM"),
            Span::raw(format_days(days_in_crm(lead.date_created, Utc::now()))),
        ]),
        Line::from(vec![label("Source"), Span::raw(classify_source(lead).to_string())]),
        Line::from(vec![
            label("Email"),
            Span::raw(if email.is_empty() { NOT_PROVIDED.to_string() } else { email }),
        ]),
        Line::from(vec![
            label("Phone"),
            Span::raw(lead.first_phone().unwrap_or(NOT_PROVIDED).to_string()),
        ]),
        Line::from(vec![
            label("Website"),
            Span::raw(lead.first_website().unwrap_or(NOT_PROVIDED).to_string()),
        ]),
        Line::from(""),
        heading("Form Details"),
    ];

    for (name, value) in form_details(lead, FIELD_ID_MAPPING) {
        lines.push(Line::from(vec![label(name), Span::raw(value)]));
    }

    let extra: Vec<&str> = [lead.details.as_deref(), lead.description.as_deref()]
        .into_iter()
        .flatten()
        .filter(|text| !text.trim().is_empty())
        .collect();
    if !extra.is_empty() {
        lines.push(Line::from(""));
        lines.push(heading("Additional Information"));
        for text in extra {
            lines.extend(text.lines().map(|l| Line::from(l.to_string())));
        }
    }

    if app.show_debug_fields {
        lines.push(Line::from(""));
        lines.push(heading("Custom Fields (debug)"));
        let unknown = HashMap::new();
        let rows = debug_custom_fields(lead, app.cache.definitions().unwrap_or(&unknown));
        if rows.is_empty() {
            lines.push(Line::from("No custom fields on this lead"));
        }
        for (id, name, value) in rows {
            let id = id.map_or_else(|| "-".to_string(), |id| id.to_string());
            lines.push(Line::from(vec![
                Span::styled(format!("{:>10} ", id), Style::default().fg(Color::DarkGray)),
                label(&name),
                Span::raw(value),
            ]));
        }
    }

    lines
}

fn render_lead_detail_mode(f: &mut Frame, app: &App, area: Rect) {
    let Some(lead) = app.current_lead() else {
        let empty = Paragraph::new("No lead selected")
            .block(Block::default().title("Lead").borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    };

    let title = format!("{} - d: draft rejection, g: debug fields, Esc: back", lead.display_name());
    let details = Paragraph::new(detail_lines(app, lead))
        .block(Block::default().title(title).borders(Borders::ALL))
        .wrap(Wrap { trim: false })
        .scroll((app.detail_scroll, 0));

    f.render_widget(details, area);
}

fn field_style(app: &App, field: DraftField) -> Style {
    if app.draft_field == field {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn reason_position(reason: RejectionReason) -> usize {
    RejectionReason::ALL.iter().position(|r| *r == reason).map_or(0, |i| i + 1)
}

fn render_draft_mode(f: &mut Frame, app: &App, area: Rect) {
    let (Some(lead), Some(draft)) = (app.current_lead(), app.current_draft()) else {
        let empty = Paragraph::new("No draft for this lead")
            .block(Block::default().title("Draft").borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // Header fields
            Constraint::Min(0),    // Body
        ])
        .split(area);

    let recipient = lead_email(lead);
    let header_text = vec![
        Line::from(vec![
            label("To"),
            Span::raw(if recipient.is_empty() { "(no email on lead)".to_string() } else { recipient }),
        ]),
        Line::from(vec![
            Span::styled("Reason: ", field_style(app, DraftField::Reason)),
            Span::raw(format!("◀ {} ▶", draft.reason)),
        ]),
        Line::from(vec![
            Span::styled("Subject: ", field_style(app, DraftField::Subject)),
            Span::raw(draft.subject.clone()),
        ]),
        Line::from(vec![
            Span::styled("CC: ", field_style(app, DraftField::Cc)),
            Span::raw(draft.cc.clone()),
        ]),
    ];

    let header = Paragraph::new(header_text).block(
        Block::default()
            .title(format!(
                "Rejection for {} ({} of {} reasons)",
                lead.display_name(),
                reason_position(draft.reason),
                RejectionReason::ALL.len()
            ))
            .borders(Borders::ALL),
    );
    f.render_widget(header, chunks[0]);

    let body = Paragraph::new(draft.body.as_str())
        .style(field_style(app, DraftField::Body))
        .block(
            Block::default()
                .title("Body - Tab: next field, Ctrl+s: send, Ctrl+x: discard, Esc: back")
                .borders(Borders::ALL),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(body, chunks[1]);
}

fn render_field_mapping_mode(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let header = Row::new(vec!["ID", "Name", "Type", "Available Values"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = app
        .definitions
        .iter()
        .skip(app.mapping_scroll as usize)
        .map(|definition| {
            Row::new(vec![
                Cell::from(definition.id.to_string()),
                Cell::from(definition.name.clone()),
                Cell::from(definition.data_type.clone().unwrap_or_default()),
                Cell::from(available_values(definition)),
            ])
        })
        .collect();

    let table = Table::new(rows)
        .header(header)
        .block(
            Block::default()
                .title(format!("Custom Field Definitions ({})", app.definitions.len()))
                .borders(Borders::ALL),
        )
        .widths(&MAPPING_COLUMNS);
    f.render_widget(table, chunks[0]);

    let code = Paragraph::new(mapping_code(&app.definitions))
        .block(
            Block::default()
                .title("Generated mapping - w: save, r: reload, Esc: back")
                .borders(Borders::ALL),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(code, chunks[1]);
}

fn render_help_mode(f: &mut Frame, _app: &App, area: Rect) {
    let help_text = vec![
        Line::from("Lead Dashboard Help"),
        Line::from(""),
        Line::from("Global:"),
        Line::from("  Ctrl+c - Quit"),
        Line::from("  ? - Show/hide help"),
        Line::from(""),
        Line::from("Lead List:"),
        Line::from("  q - Quit"),
        Line::from("  / - Search by name or company"),
        Line::from("  ↑/↓ - Navigate leads"),
        Line::from("  Enter - Open selected lead"),
        Line::from("  r - Refresh leads"),
        Line::from("  t - Test email connection"),
        Line::from("  v - Verify CRM configuration"),
        Line::from("  m - Field mapping tool"),
        Line::from(""),
        Line::from("Lead Detail:"),
        Line::from("  d - Draft rejection email"),
        Line::from("  g - Toggle custom field debug table"),
        Line::from("  Esc - Return to lead list"),
        Line::from(""),
        Line::from("Draft:"),
        Line::from("  Tab/Shift+Tab - Move between fields"),
        Line::from("  ←/→ - Change rejection reason"),
        Line::from("  Ctrl+s - Send email"),
        Line::from("  Ctrl+x - Discard draft"),
        Line::from("  Esc - Back to lead (draft is kept)"),
    ];

    let help = Paragraph::new(help_text)
        .block(Block::default().title("Help").borders(Borders::ALL));

    let centered_area = centered_rect(60, 80, area);
    f.render_widget(help, centered_area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let mut text = format!(
        "Leads: {} | Drafts: {} | CRM: {} | Email: {} | Mode: {:?}",
        app.leads.len(),
        app.drafts.len(),
        if app.config.crm_configured() { "ok" } else { "not configured" },
        if app.config.mail_configured() { "ok" } else { "not configured" },
        app.mode
    );

    if let Some(error) = &app.error_message {
        text = format!("ERROR: {}", error.lines().next().unwrap_or(""));
    } else if let Some(info) = &app.info_message {
        text = format!("INFO: {}", info);
    }

    let status = Paragraph::new(text)
        .style(Style::default().bg(Color::Blue).fg(Color::White));

    f.render_widget(status, area);
}

// Helper function to create a centered rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_rect_is_inside() {
        let outer = Rect::new(0, 0, 100, 50);
        let inner = centered_rect(60, 80, outer);
        assert_eq!(inner.width, 60);
        assert_eq!(inner.height, 40);
        assert!(inner.x >= outer.x && inner.y >= outer.y);
    }
}
